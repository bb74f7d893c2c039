//! Reading peak seeds and sensitivity factors from delimited text.
//!
//! Rows are tab separated when the line contains a tab and comma separated otherwise.
//! Blank lines and lines starting with `#` are skipped, as is a leading header row.
//!
//! A seed row has seventeen fields:
//!
//! | # | field |
//! |---|-------|
//! | 1 | region label, e.g. `Pb 4f 1/2` |
//! | 2-4 | center `init, min, max` |
//! | 5-7 | sigma `init, min, max` |
//! | 8-10 | amplitude `init, min, max` |
//! | 11 | total acquisition time in seconds |
//! | 12-14 | gamma `init, min, max` |
//! | 15-17 | skew `init, min, max` |
//!
//! An RSF row is `label<sep>factor`.
use std::fs;
use std::io;
use std::path;

use thiserror::Error;

use crate::error::{Problem, ValidationError, ValidationIssue};
use crate::fitting::{self, BackgroundSpec, Bounded, PeakProfile, PeakSpec};
use crate::quantify::RsfTable;

pub const SEED_FIELDS: usize = 17;
pub const RSF_FIELDS: usize = 2;

const SEED_FIELD_NAMES: [&str; SEED_FIELDS] = [
    "label",
    "center.init",
    "center.min",
    "center.max",
    "sigma.init",
    "sigma.min",
    "sigma.max",
    "amplitude.init",
    "amplitude.min",
    "amplitude.max",
    "total_time",
    "gamma.init",
    "gamma.min",
    "gamma.max",
    "skew.init",
    "skew.min",
    "skew.max",
];

#[derive(Debug, Error)]
pub enum TextError {
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

fn split_fields(line: &str) -> Vec<&str> {
    let delimiter = if line.contains('\t') { '\t' } else { ',' };
    line.split(delimiter).map(str::trim).collect()
}

/// The non-blank, non-comment lines of `text` with their 1-based line numbers
fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// A header row has no number in any column after the label. A row with at least one
/// number is data, and its malformed fields are reported.
fn is_header(line: &str) -> bool {
    let fields = split_fields(line);
    fields.len() > 1 && fields[1..].iter().all(|field| field.parse::<f64>().is_err())
}

fn row_label(fields: &[&str], line_number: usize) -> String {
    match fields.first() {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => format!("line {line_number}"),
    }
}

/// Parse one seed row into a [`PeakSpec`] with a [`PeakProfile::SkewedPseudoVoigt`] profile.
///
/// Every malformed field is reported, but bounds are not checked here, see
/// [`parse_seed_table`].
pub fn parse_seed_row(line: &str, line_number: usize) -> Result<PeakSpec, Vec<ValidationIssue>> {
    let fields = split_fields(line);
    let label = row_label(&fields, line_number);
    if fields.len() != SEED_FIELDS {
        return Err(vec![ValidationIssue::new(
            label,
            None,
            Problem::FieldCount {
                expected: SEED_FIELDS,
                actual: fields.len(),
            },
        )]);
    }

    let mut issues = Vec::new();
    let mut values = [0.0; SEED_FIELDS];
    for (i, (field, name)) in fields.iter().zip(SEED_FIELD_NAMES).enumerate().skip(1) {
        match field.parse::<f64>() {
            Ok(v) => values[i] = v,
            Err(_) => issues.push(ValidationIssue::new(
                &label,
                Some(name),
                Problem::MalformedField {
                    field: name.to_string(),
                    value: field.to_string(),
                },
            )),
        }
    }
    if !issues.is_empty() {
        return Err(issues);
    }

    let triple = |start: usize| Bounded::from_seed(values[start], values[start + 1], values[start + 2]);
    Ok(PeakSpec::new(label.as_str(), triple(1), triple(4), triple(7))
        .total_time(values[10])
        .profile(PeakProfile::SkewedPseudoVoigt {
            gamma: triple(11),
            skew: triple(14),
        }))
}

/// Parse and validate a full seed table, reporting every problem in every row
pub fn parse_seed_table(text: &str) -> Result<Vec<PeakSpec>, ValidationError> {
    let mut lines = data_lines(text).peekable();
    if lines.peek().is_some_and(|(_, line)| is_header(line)) {
        lines.next();
    }

    let mut specs = Vec::new();
    let mut issues = Vec::new();
    for (line_number, line) in lines {
        match parse_seed_row(line, line_number) {
            Ok(spec) => specs.push(spec),
            Err(row_issues) => issues.extend(row_issues),
        }
    }
    if let Err(err) = fitting::validate(&specs, &BackgroundSpec::default()) {
        issues.extend(err.issues);
    }
    ValidationError::check(issues)?;
    Ok(specs)
}

/// Parse an RSF table of `label<sep>factor` rows
pub fn parse_rsf_table(text: &str) -> Result<RsfTable, ValidationError> {
    let mut lines = data_lines(text).peekable();
    if lines.peek().is_some_and(|(_, line)| is_header(line)) {
        lines.next();
    }

    let mut entries = Vec::new();
    let mut issues = Vec::new();
    for (line_number, line) in lines {
        let fields = split_fields(line);
        let label = row_label(&fields, line_number);
        if fields.len() != RSF_FIELDS {
            issues.push(ValidationIssue::new(
                label,
                None,
                Problem::FieldCount {
                    expected: RSF_FIELDS,
                    actual: fields.len(),
                },
            ));
            continue;
        }
        match fields[1].parse::<f64>() {
            Ok(factor) => entries.push((label, factor)),
            Err(_) => issues.push(ValidationIssue::new(
                label,
                Some("rsf"),
                Problem::MalformedField {
                    field: "rsf".to_string(),
                    value: fields[1].to_string(),
                },
            )),
        }
    }

    match RsfTable::new(entries) {
        Ok(table) => {
            ValidationError::check(issues)?;
            Ok(table)
        }
        Err(err) => {
            issues.extend(err.issues);
            Err(ValidationError::new(issues))
        }
    }
}

pub fn load_seed_table<P: AsRef<path::Path>>(path: P) -> Result<Vec<PeakSpec>, TextError> {
    let text = fs::read_to_string(path)?;
    Ok(parse_seed_table(&text)?)
}

pub fn load_rsf_table<P: AsRef<path::Path>>(path: P) -> Result<RsfTable, TextError> {
    let text = fs::read_to_string(path)?;
    Ok(parse_rsf_table(&text)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fitting::ParameterKind;

    const SEEDS: &str = "\
# label\tcenter\t\t\tsigma\t\t\tamplitude\t\t\ttime\tgamma\t\t\tskew
label\tc\tcmin\tcmax\ts\tsmin\tsmax\ta\tamin\tamax\tt\tg\tgmin\tgmax\tk\tkmin\tkmax
Pb 4f 1/2\t136.5\t136.0\t137.0\t0.8\t0.3\t2.0\t1000\t0\t5000\t120\t0.3\t0\t1\t0\t-1\t1

Pb 4f 3/2\t141.4\t141.0\t142.0\t0.8\t0.3\t2.0\t750\t0\t5000\t120\t0.3\t0\t1\t0\t-1\t1
";

    #[test]
    fn test_parse_seed_table() {
        let specs = parse_seed_table(SEEDS).unwrap();
        assert_eq!(specs.len(), 2);
        let pb = &specs[0];
        assert_eq!(pb.region_id, "Pb 4f 1/2");
        assert_eq!(pb.center, Bounded::new(136.0, 136.5, 137.0));
        assert_eq!(pb.total_time, 120.0);
        assert_eq!(pb.profile.skew(), Some(&Bounded::new(-1.0, 0.0, 1.0)));
        assert_eq!(pb.parameters().len(), ParameterKind::PEAK.len());
    }

    #[test]
    fn test_comma_separated_without_header() {
        let spec = parse_seed_table("C 1s,284.8,284,285.5,0.6,0.2,2,300,0,1e4,60,0.1,0,1,0,0,0\n").unwrap();
        assert_eq!(spec[0].region_id, "C 1s");
        assert_eq!(spec[0].profile.skew(), Some(&Bounded::fixed(0.0)));
    }

    #[test]
    fn test_row_issues_are_collected() {
        let text = "\
O 1s,531,530,532,abc,0.2,2,300,0,1e4,60,0.1,0,1,0,0,0
N 1s,400,399
C 1s,284.8,284,285.5,0.6,0.2,2,300,0,1e4,60,0.1,0,1,0,0,0
C 1s,284.8,286,285.5,0.6,0.2,2,300,0,1e4,60,0.1,0,1,0,0,0
";
        let err = parse_seed_table(text).unwrap_err();
        assert!(err.mentions("O 1s", "sigma.init"));
        assert!(err
            .issues
            .iter()
            .any(|i| i.region_id == "N 1s" && matches!(i.problem, Problem::FieldCount { actual: 3, .. })));
        assert!(err.mentions("C 1s", "center"));
        assert!(err
            .issues
            .iter()
            .any(|i| i.region_id == "C 1s" && i.problem == Problem::DuplicateRegion));
    }

    #[test]
    fn test_malformed_first_row_is_reported() {
        let text = "\
O 1s,abc,530,532,0.6,0.2,2,300,0,1e4,60,0.1,0,1,0,0,0
C 1s,284.8,284,285.5,0.6,0.2,2,300,0,1e4,60,0.1,0,1,0,0,0
";
        let err = parse_seed_table(text).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.mentions("O 1s", "center.init"));

        assert!(is_header("label,center,cmin,cmax"));
        assert!(!is_header("O 1s,abc,530"));
        assert!(!is_header("C 1s"));
    }

    #[test]
    fn test_parse_rsf_table() {
        let table = parse_rsf_table("label,rsf\nPb 4f 1/2,5.678\nC 1s,1.0\n").unwrap();
        assert_eq!(table.get("Pb 4f 1/2"), Some(5.678));
        assert_eq!(table.len(), 2);

        let err = parse_rsf_table("S 2p\t1.6\nC 1s\tzero\nO 1s\t-2.9\nN 1s\n").unwrap_err();
        assert_eq!(err.issues.len(), 3);
        assert!(err.mentions("C 1s", "rsf"));
        assert!(err.mentions("O 1s", "rsf"));
    }
}
