use std::sync::LazyLock;

use regex::Regex;

static COORDINATES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"X(\d+)Y(\d+)").unwrap());
static SPOT_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"R\d+X\d+Y\d+").unwrap());
static LEADING_SPOT_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^R\d+X\d+Y\d+").unwrap());

/// A 2D coordinate `[x, y]`.
pub type Point = [f64; 2];

/// Machine spot coordinates from the per-spectrum spot label string.
///
/// # Arguments
///
/// * `spot_names` - comma-joined spot labels, each containing a substring like `R00X103Y2048`
///
/// # Returns
///
/// * every `X<int>Y<int>` occurrence as an integer pair, in label order
///
pub fn parse_spot_coordinates(spot_names: &str) -> Vec<[i64; 2]> {
    spot_names
        .split(',')
        .flat_map(|token| {
            COORDINATES
                .captures_iter(token)
                .filter_map(|caps| {
                    let x = caps[1].parse::<i64>().ok()?;
                    let y = caps[2].parse::<i64>().ok()?;
                    Some([x, y])
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// The `R<int>X<int>Y<int>` name of every token that carries one.
pub fn parse_spot_names(spot_names: &str) -> Vec<String> {
    spot_names
        .split(',')
        .filter_map(extract_spot_name)
        .collect()
}

/// First `R<int>X<int>Y<int>` occurrence in a string, if any.
pub fn extract_spot_name(token: &str) -> Option<String> {
    SPOT_NAME.find(token).map(|m| m.as_str().to_string())
}

/// Spot name a raw spectrum line starts with, used when pairing exports by spot range.
pub fn leading_spot_name(line: &str) -> Option<String> {
    LEADING_SPOT_NAME.find(line.trim_start()).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spot_coordinates() {
        let spots = parse_spot_coordinates("R1X10Y20,R1X15Y20,R1X10Y25");
        assert_eq!(spots, vec![[10, 20], [15, 20], [10, 25]]);
    }

    #[test]
    fn test_parse_spot_coordinates_with_prefixes() {
        let spots = parse_spot_coordinates("'sample_R00X103Y2048', 'sample_R00X104Y2048'");
        assert_eq!(spots, vec![[103, 2048], [104, 2048]]);
        assert!(parse_spot_coordinates("").is_empty());
    }

    #[test]
    fn test_parse_spot_names() {
        let names = parse_spot_names("['a_R00X1Y2', 'a_R00X3Y4', 'junk']");
        assert_eq!(names, vec!["R00X1Y2".to_string(), "R00X3Y4".to_string()]);
    }

    #[test]
    fn test_leading_spot_name() {
        assert_eq!(leading_spot_name("R00X12Y9;123.4;55"), Some("R00X12Y9".to_string()));
        assert_eq!(leading_spot_name("# header R00X12Y9"), None);
    }
}
