/// Parse a Serbian-formatted price (`44.999,00`) into a number.
///
/// `.` groups thousands and `,` marks decimals. Anything that does not parse
/// to a finite number comes back as `None` so a bad price never drops the
/// rest of the record.
pub fn normalize(text: &str) -> Option<f64> {
    let canonical = text.replace('.', "").replace(',', ".");
    canonical
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_and_decimals() {
        assert_eq!(normalize("44.999,00"), Some(44999.00));
        assert_eq!(normalize("1.234.567,89"), Some(1234567.89));
    }

    #[test]
    fn no_thousands_group() {
        assert_eq!(normalize("500,00"), Some(500.00));
        assert_eq!(normalize("7,50"), Some(7.50));
    }

    #[test]
    fn surrounding_whitespace() {
        assert_eq!(normalize("  3.299,00 \n"), Some(3299.00));
    }

    #[test]
    fn malformed_is_none() {
        for input in ["", "   ", "cena", "RSD", "1,2,3", "12,00,00", "nan", "inf", "-"] {
            assert_eq!(normalize(input), None, "{:?} should not parse", input);
        }
    }
}
