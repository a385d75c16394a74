// The simulation prints its timing summary within the last few lines of
// output; only that tail window is scanned.
const TAIL_LINES: usize = 10;

pub fn extract_runtime(output: &str) -> Option<f64> {
    for line in tail_lines(output) {
        for (idx, _) in line.match_indices("run time was ") {
            if let Some(total) = parse_runtime_tail(&line[idx..]) {
                return Some(total as f64);
            }
        }
    }
    None
}

pub fn extract_event_rate(output: &str) -> Option<f64> {
    for line in tail_lines(output) {
        for (idx, _) in line.match_indices("seconds/event") {
            if let Some(rate) = parse_event_rate_at(line, idx) {
                return Some(rate);
            }
        }
    }
    None
}

fn tail_lines(output: &str) -> Vec<&str> {
    let lines: Vec<&str> = output.split('\n').collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    lines[start..].to_vec()
}

// "run time was D days, H hours, M minutes and S seconds"
fn parse_runtime_tail(s: &str) -> Option<u64> {
    let s = s.strip_prefix("run time was ")?;
    let (days, s) = take_u64(s)?;
    let s = expect_word(s, "days,")?;
    let (hours, s) = take_u64(skip_ws(s)?)?;
    let s = expect_word(s, "hours,")?;
    let (minutes, s) = take_u64(skip_ws(s)?)?;
    let s = skip_ws(s)?;
    let s = s.strip_prefix("minutes and ")?;
    let (seconds, s) = take_u64(s)?;
    let s = skip_ws(s)?;
    if !s.starts_with("seconds") {
        return None;
    }
    Some(days * 86_400 + hours * 3_600 + minutes * 60 + seconds)
}

fn expect_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    skip_ws(s)?.strip_prefix(word)
}

fn skip_ws(s: &str) -> Option<&str> {
    let end = s.find(|c: char| !c.is_whitespace()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some(&s[end..])
}

fn take_u64(s: &str) -> Option<(u64, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

// "<x> seconds/event = <y> events/second", numbers decimal or exponential.
// The extracted rate is y.
fn parse_event_rate_at(line: &str, idx: usize) -> Option<f64> {
    if !ends_with_decimal_number(line[..idx].trim_end()) {
        return None;
    }
    let after = line[idx + "seconds/event".len()..].trim_start();
    let after = after.strip_prefix('=')?.trim_start();
    let (rate, rest) = take_rate_number(after)?;
    if rest.trim_start().starts_with("events/second") {
        Some(rate)
    } else {
        None
    }
}

// Matches a trailing "<digits>.<digits>" with an optional "e{+|-}<digits>"
// exponent, the shape the simulation uses for seconds-per-event.
fn ends_with_decimal_number(s: &str) -> bool {
    let b = s.as_bytes();
    let mut end = b.len();

    let mut j = end;
    while j > 0 && b[j - 1].is_ascii_digit() {
        j -= 1;
    }
    if j < end && j >= 2 && (b[j - 1] == b'+' || b[j - 1] == b'-') && b[j - 2] == b'e' {
        end = j - 2;
    }

    let mut frac = end;
    while frac > 0 && b[frac - 1].is_ascii_digit() {
        frac -= 1;
    }
    if frac == end || frac == 0 || b[frac - 1] != b'.' {
        return false;
    }
    let dot = frac - 1;
    let mut int = dot;
    while int > 0 && b[int - 1].is_ascii_digit() {
        int -= 1;
    }
    int < dot
}

// Leading "<digits>[.<digits>[e{+|-}<digits>]]"; a bare integer is accepted.
fn take_rate_number(s: &str) -> Option<(f64, &str)> {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 {
        return None;
    }
    let mut end = i;
    if i < b.len() && b[i] == b'.' {
        let mut j = i + 1;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if j > i + 1 {
            end = j;
            if j + 1 < b.len() && b[j] == b'e' && (b[j + 1] == b'+' || b[j + 1] == b'-') {
                let mut k = j + 2;
                while k < b.len() && b[k].is_ascii_digit() {
                    k += 1;
                }
                if k > j + 2 {
                    end = k;
                }
            }
        }
    }
    let value: f64 = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}
