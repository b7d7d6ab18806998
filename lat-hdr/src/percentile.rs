pub const DEFAULT_PERCENTILES: [f64; 5] = [50.0, 90.0, 95.0, 99.0, 99.9];

/// Parse an `@`-delimited percentile list such as `"50@95@99.9"`.
///
/// Tokens that are not numbers in the open interval (0, 100) and repeats are dropped.
/// If nothing usable remains the default set is returned.
pub fn parse_percentiles(spec: &str) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::new();
    for tok in spec.split('@').map(str::trim).filter(|t| !t.is_empty()) {
        let Ok(p) = tok.parse::<f64>() else {
            continue;
        };
        if p > 0.0 && p < 100.0 && !out.contains(&p) {
            out.push(p);
        }
    }
    if out.is_empty() {
        DEFAULT_PERCENTILES.to_vec()
    } else {
        out
    }
}

/// Column name of a percentile field: `p50`, `p99`, `p99_9`.
pub fn field_name(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("p{}", p as u64)
    } else {
        format!("p{p}").replace('.', "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!(parse_percentiles("50@99"), vec![50.0, 99.0]);
        assert_eq!(parse_percentiles(" 99.9 @ 50 @99.9"), vec![99.9, 50.0]);
        assert_eq!(parse_percentiles(""), DEFAULT_PERCENTILES.to_vec());
        assert_eq!(parse_percentiles("abc@0@100@-3"), DEFAULT_PERCENTILES.to_vec());
        assert_eq!(parse_percentiles("abc@75"), vec![75.0]);
    }

    #[test]
    fn field_names() {
        assert_eq!(field_name(50.0), "p50");
        assert_eq!(field_name(99.0), "p99");
        assert_eq!(field_name(99.9), "p99_9");
        assert_eq!(field_name(99.99), "p99_99");
    }
}
