//! Done markers
//!
//! A done marker is an empty file at `<payload>.done`. Only its existence
//! carries meaning: the payload beside it was transferred completely.

/// Suffix appended to a payload path to name its marker
pub const DONE_SUFFIX: &str = ".done";

/// Marker path for a payload path.
pub fn marker_path(payload: &str) -> String {
    format!("{}{}", payload.trim_end_matches('/'), DONE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_path() {
        assert_eq!(marker_path("/srv/in/S1A_RTC.zip"), "/srv/in/S1A_RTC.zip.done");
        assert_eq!(marker_path("/srv/in/S1A_RTC/"), "/srv/in/S1A_RTC.done");
    }
}
