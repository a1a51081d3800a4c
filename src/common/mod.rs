//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Canonical chromosome names, in order of their internal numbers 1..=26.
///
/// All query predicates operate on the small-integer form; the textual
/// form only appears at input parsing and output rendering.
pub const CHROMS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "XY", "MT",
];

/// Normalize a textual chromosome name to its internal number.
///
/// Accepts `1`..`22`, `X`, `Y`, `XY`, `M`/`MT` in any case, with or without
/// a `chr` prefix, with surrounding whitespace.  `M` and `MT` both map to 26.
pub fn chrom_to_num(name: &str) -> Option<u8> {
    let name = name.trim();
    let name = if name.len() >= 3 && name[..3].eq_ignore_ascii_case("chr") {
        &name[3..]
    } else {
        name
    };
    let upper = name.to_ascii_uppercase();
    let upper = if upper == "M" { "MT".to_string() } else { upper };
    CHROMS
        .iter()
        .position(|&c| c == upper)
        .map(|idx| (idx + 1) as u8)
        .or_else(|| match upper.parse::<u8>() {
            Ok(num) if (1..=26).contains(&num) => Some(num),
            _ => None,
        })
}

/// Return the canonical name for an internal chromosome number.
pub fn chrom_name(num: u8) -> Option<&'static str> {
    if (1..=26).contains(&num) {
        Some(CHROMS[(num - 1) as usize])
    } else {
        None
    }
}

/// The version of the `kbfilter-worker` package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Return the version of the `kbfilter-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case("1", Some(1))]
    #[case("22", Some(22))]
    #[case("X", Some(23))]
    #[case("x", Some(23))]
    #[case("chrX", Some(23))]
    #[case("Y", Some(24))]
    #[case("XY", Some(25))]
    #[case("MT", Some(26))]
    #[case("M", Some(26))]
    #[case("chrM", Some(26))]
    #[case("chrMT", Some(26))]
    #[case(" chr17 ", Some(17))]
    #[case("23", Some(23))]
    #[case("26", Some(26))]
    #[case("0", None)]
    #[case("27", None)]
    #[case("banana", None)]
    fn chrom_to_num(#[case] name: &str, #[case] expected: Option<u8>) {
        assert_eq!(expected, super::chrom_to_num(name));
    }

    #[test]
    fn chrom_round_trip() {
        for num in 1..=26u8 {
            let name = super::chrom_name(num).unwrap();
            assert_eq!(Some(num), super::chrom_to_num(name));
            assert_eq!(Some(num), super::chrom_to_num(&format!("chr{}", name)));
            assert_eq!(Some(num), super::chrom_to_num(&name.to_ascii_lowercase()));
        }
        assert_eq!(None, super::chrom_name(0));
        assert_eq!(None, super::chrom_name(27));
    }
}
