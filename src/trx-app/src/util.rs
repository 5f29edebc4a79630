// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Normalize a name to lowercase alphanumeric.
pub fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Split a `key[=value],key=value,...` list.
///
/// Keys are trimmed and kept in order; a key without `=` gets an empty value.
/// Empty items are skipped.
pub fn parse_kv_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (item.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("SoapySDR"), "soapysdr");
        assert_eq!(normalize_name("rtl-sdr"), "rtlsdr");
        assert_eq!(normalize_name("foo_bar-baz"), "foobarbaz");
    }

    #[test]
    fn test_parse_kv_list() {
        let items = parse_kv_list("file=/tmp/a.raw, rate=96000,repeat,,");
        assert_eq!(
            items,
            vec![
                ("file".to_string(), "/tmp/a.raw".to_string()),
                ("rate".to_string(), "96000".to_string()),
                ("repeat".to_string(), String::new()),
            ]
        );
        assert!(parse_kv_list("  ").is_empty());
    }
}
