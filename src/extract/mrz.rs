//! Machine-readable-zone parsing (ICAO 9303)
//!
//! Parses TD1 (3 lines of 30) and TD3 (2 lines of 44) MRZ blocks into
//! document fields. Check digits use the standard 7-3-1 weighting over the
//! value mapping 0-9 -> 0-9, A-Z -> 10-35, '<' -> 0. A record is only
//! returned when every covered check digit verifies and the core fields
//! are present.

use serde::Serialize;
use thiserror::Error;

pub const TD1_LINE_LEN: usize = 30;
pub const TD3_LINE_LEN: usize = 44;

#[derive(Debug, Error, PartialEq)]
pub enum MrzError {
    #[error("unsupported MRZ layout: {lines} lines of {len} chars")]
    UnsupportedLayout { lines: usize, len: usize },
    #[error("invalid character {0:?} in MRZ")]
    InvalidCharacter(char),
    #[error("check digit mismatch for {field}")]
    CheckDigit { field: &'static str },
    #[error("required field {field} is missing")]
    MissingField { field: &'static str },
}

/// Parsed document fields. Dates are ISO `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MrzRecord {
    /// "Passport" or "ID".
    pub document_type: String,
    pub issuing_state: String,
    pub document_number: String,
    /// Display name: secondary identifier(s), then primary.
    pub name: String,
    pub primary_identifier: String,
    pub secondary_identifier: String,
    pub nationality: String,
    pub birth_date: String,
    /// "Male", "Female" or "Unspecified".
    pub sex: String,
    pub expiry_date: String,
    pub optional_data: String,
}

/// Compute the 7-3-1 check digit of a field.
pub fn check_digit(field: &str) -> Result<u8, MrzError> {
    const WEIGHTS: [u32; 3] = [7, 3, 1];
    let mut sum = 0u32;
    for (i, c) in field.chars().enumerate() {
        sum += char_value(c)? * WEIGHTS[i % 3];
    }
    Ok((sum % 10) as u8)
}

fn char_value(c: char) -> Result<u32, MrzError> {
    match c {
        '0'..='9' => Ok(c as u32 - '0' as u32),
        'A'..='Z' => Ok(c as u32 - 'A' as u32 + 10),
        '<' => Ok(0),
        other => Err(MrzError::InvalidCharacter(other)),
    }
}

fn verify(field: &str, digit: char, name: &'static str) -> Result<(), MrzError> {
    // An all-filler optional field may carry '<' instead of a digit.
    if digit == '<' && field.chars().all(|c| c == '<') {
        return Ok(());
    }
    let expected = check_digit(field)?;
    if digit.to_digit(10) == Some(expected as u32) {
        Ok(())
    } else {
        Err(MrzError::CheckDigit { field: name })
    }
}

/// Strip filler: trailing '<' removed, interior '<' become spaces.
fn clean(field: &str) -> String {
    field.trim_end_matches('<').replace('<', " ")
}

/// Split a name field into (primary, secondary) identifiers.
fn split_name(field: &str) -> (String, String) {
    match field.split_once("<<") {
        Some((primary, secondary)) => (clean(primary), clean(secondary)),
        None => (clean(field), String::new()),
    }
}

/// Assemble the display name the way ID viewers do: given names first.
fn display_name(primary: &str, secondary: &str) -> String {
    match (primary.is_empty(), secondary.is_empty()) {
        (false, false) => format!("{secondary} {primary}"),
        (false, true) => primary.to_string(),
        (true, false) => secondary.to_string(),
        (true, true) => String::new(),
    }
}

fn sex_label(c: char) -> String {
    match c {
        'M' => "Male".to_string(),
        'F' => "Female".to_string(),
        _ => "Unspecified".to_string(),
    }
}

/// Approximate current year. Century windowing only needs the year to the
/// nearest unit; calendar-precision conversion is not warranted here.
fn current_year() -> i32 {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    1970 + (secs as f64 / (365.2425 * 86_400.0)) as i32
}

/// Expand a YYMMDD date to YYYY-MM-DD. Birth years window against the
/// current year (74 -> 1974 while the century allows); expiry years are
/// always 2000-based.
fn expand_date(yymmdd: &str, is_birth: bool) -> String {
    if yymmdd.len() != 6 || !yymmdd.chars().all(|c| c.is_ascii_digit()) {
        return clean(yymmdd);
    }
    let yy: i32 = yymmdd[0..2].parse().unwrap_or(0);
    let year = if is_birth && yy > current_year() % 100 {
        1900 + yy
    } else {
        2000 + yy
    };
    format!("{year}-{}-{}", &yymmdd[2..4], &yymmdd[4..6])
}

fn document_type_label(code: char) -> String {
    match code {
        'P' => "Passport".to_string(),
        'I' | 'A' | 'C' => "ID".to_string(),
        other => other.to_string(),
    }
}

/// Parse an MRZ block. Accepts 2 lines of 44 (TD3) or 3 lines of 30 (TD1).
pub fn parse_mrz(lines: &[&str]) -> Result<MrzRecord, MrzError> {
    for line in lines {
        if let Some(c) = line.chars().find(|c| !c.is_ascii()) {
            return Err(MrzError::InvalidCharacter(c));
        }
    }
    match lines {
        [l1, l2] if l1.len() == TD3_LINE_LEN && l2.len() == TD3_LINE_LEN => parse_td3(l1, l2),
        [l1, l2, l3]
            if l1.len() == TD1_LINE_LEN
                && l2.len() == TD1_LINE_LEN
                && l3.len() == TD1_LINE_LEN =>
        {
            parse_td1(l1, l2, l3)
        }
        _ => Err(MrzError::UnsupportedLayout {
            lines: lines.len(),
            len: lines.first().map_or(0, |l| l.len()),
        }),
    }
}

fn parse_td3(l1: &str, l2: &str) -> Result<MrzRecord, MrzError> {
    let code = l1.chars().next().unwrap_or('<');
    let issuing_state = clean(&l1[2..5]);
    let (primary, secondary) = split_name(&l1[5..44]);

    let number_raw = &l2[0..9];
    verify(number_raw, l2.as_bytes()[9] as char, "document number")?;
    let nationality = clean(&l2[10..13]);
    let birth_raw = &l2[13..19];
    verify(birth_raw, l2.as_bytes()[19] as char, "birth date")?;
    let sex = sex_label(l2.as_bytes()[20] as char);
    let expiry_raw = &l2[21..27];
    verify(expiry_raw, l2.as_bytes()[27] as char, "expiry date")?;
    let personal_raw = &l2[28..42];
    verify(personal_raw, l2.as_bytes()[42] as char, "personal number")?;

    let composite: String = format!("{}{}{}", &l2[0..10], &l2[13..20], &l2[21..43]);
    verify(&composite, l2.as_bytes()[43] as char, "composite")?;

    let document_number = clean(number_raw);
    if document_number.is_empty() {
        return Err(MrzError::MissingField {
            field: "document number",
        });
    }
    if primary.is_empty() && secondary.is_empty() {
        return Err(MrzError::MissingField { field: "name" });
    }

    Ok(MrzRecord {
        document_type: document_type_label(code),
        issuing_state,
        document_number,
        name: display_name(&primary, &secondary),
        primary_identifier: primary,
        secondary_identifier: secondary,
        nationality,
        birth_date: expand_date(birth_raw, true),
        sex,
        expiry_date: expand_date(expiry_raw, false),
        optional_data: clean(personal_raw),
    })
}

fn parse_td1(l1: &str, l2: &str, l3: &str) -> Result<MrzRecord, MrzError> {
    let code = l1.chars().next().unwrap_or('<');
    let issuing_state = clean(&l1[2..5]);
    let number_raw = &l1[5..14];
    verify(number_raw, l1.as_bytes()[14] as char, "document number")?;
    let optional1 = &l1[15..30];

    let birth_raw = &l2[0..6];
    verify(birth_raw, l2.as_bytes()[6] as char, "birth date")?;
    let sex = sex_label(l2.as_bytes()[7] as char);
    let expiry_raw = &l2[8..14];
    verify(expiry_raw, l2.as_bytes()[14] as char, "expiry date")?;
    let nationality = clean(&l2[15..18]);
    let optional2 = &l2[18..29];

    let composite = format!(
        "{}{}{}{}",
        &l1[5..30],
        &l2[0..7],
        &l2[8..15],
        &l2[18..29]
    );
    verify(&composite, l2.as_bytes()[29] as char, "composite")?;

    let (primary, secondary) = split_name(l3);

    let document_number = clean(number_raw);
    if document_number.is_empty() {
        return Err(MrzError::MissingField {
            field: "document number",
        });
    }
    if primary.is_empty() && secondary.is_empty() {
        return Err(MrzError::MissingField { field: "name" });
    }

    Ok(MrzRecord {
        document_type: document_type_label(code),
        issuing_state,
        document_number,
        name: display_name(&primary, &secondary),
        primary_identifier: primary,
        secondary_identifier: secondary,
        nationality,
        birth_date: expand_date(birth_raw, true),
        sex,
        expiry_date: expand_date(expiry_raw, false),
        optional_data: format!("{}{}", clean(optional1), clean(optional2)),
    })
}

/// Locate and parse an MRZ block inside arbitrary recognizer output.
///
/// Lines are uppercased and stripped of spaces first (recognizers often
/// split the filler runs), then consecutive runs of MRZ-shaped lines are
/// tried as TD3 and TD1 blocks.
pub fn find_and_parse(lines: &[String]) -> Option<MrzRecord> {
    let normalized: Vec<String> = lines
        .iter()
        .map(|l| l.to_uppercase().replace(' ', ""))
        .collect();

    for window in normalized.windows(2) {
        if window.iter().all(|l| l.len() == TD3_LINE_LEN) {
            if let Ok(record) = parse_mrz(&[window[0].as_str(), window[1].as_str()]) {
                return Some(record);
            }
        }
    }
    for window in normalized.windows(3) {
        if window.iter().all(|l| l.len() == TD1_LINE_LEN) {
            if let Ok(record) = parse_mrz(&[
                window[0].as_str(),
                window[1].as_str(),
                window[2].as_str(),
            ]) {
                return Some(record);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // ICAO 9303 specimen documents (Utopia / Anna Maria Eriksson).
    const TD3_L1: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<";
    const TD3_L2: &str = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";

    const TD1_L1: &str = "I<UTOD231458907<<<<<<<<<<<<<<<";
    const TD1_L2: &str = "7408122F1204159UTO<<<<<<<<<<<6";
    const TD1_L3: &str = "ERIKSSON<<ANNA<MARIA<<<<<<<<<<";

    #[test]
    fn test_check_digit_weighting() {
        assert_eq!(check_digit("520727").unwrap(), 3);
        assert_eq!(check_digit("L898902C3").unwrap(), 6);
        assert_eq!(check_digit("<<<<<<").unwrap(), 0);
        assert!(check_digit("ab").is_err());
    }

    #[test]
    fn test_td3_specimen_parses() {
        let record = parse_mrz(&[TD3_L1, TD3_L2]).unwrap();
        assert_eq!(record.document_type, "Passport");
        assert_eq!(record.issuing_state, "UTO");
        assert_eq!(record.document_number, "L898902C3");
        assert_eq!(record.primary_identifier, "ERIKSSON");
        assert_eq!(record.secondary_identifier, "ANNA MARIA");
        assert_eq!(record.name, "ANNA MARIA ERIKSSON");
        assert_eq!(record.nationality, "UTO");
        assert_eq!(record.birth_date, "1974-08-12");
        assert_eq!(record.sex, "Female");
        assert_eq!(record.expiry_date, "2012-04-15");
    }

    #[test]
    fn test_td1_specimen_parses() {
        let record = parse_mrz(&[TD1_L1, TD1_L2, TD1_L3]).unwrap();
        assert_eq!(record.document_type, "ID");
        assert_eq!(record.document_number, "D23145890");
        assert_eq!(record.name, "ANNA MARIA ERIKSSON");
        assert_eq!(record.birth_date, "1974-08-12");
        assert_eq!(record.expiry_date, "2012-04-15");
    }

    #[test]
    fn test_corrupt_check_digit_is_rejected() {
        // Flip the document-number check digit 6 -> 7.
        let corrupted = TD3_L2.replacen("L898902C36", "L898902C37", 1);
        assert_eq!(
            parse_mrz(&[TD3_L1, &corrupted]),
            Err(MrzError::CheckDigit {
                field: "document number"
            })
        );
    }

    #[test]
    fn test_corrupt_composite_is_rejected() {
        // Flip the trailing composite check digit itself.
        let mut bytes = TD3_L2.as_bytes().to_vec();
        bytes[43] = b'5';
        let corrupted = String::from_utf8(bytes).unwrap();
        assert_eq!(
            parse_mrz(&[TD3_L1, &corrupted]),
            Err(MrzError::CheckDigit { field: "composite" })
        );
    }

    #[test]
    fn test_unsupported_layout() {
        assert_eq!(
            parse_mrz(&["TOO<SHORT"]),
            Err(MrzError::UnsupportedLayout { lines: 1, len: 9 })
        );
    }

    #[test]
    fn test_invalid_character() {
        let bad = TD3_L2.replacen('L', "!", 1);
        assert!(matches!(
            parse_mrz(&[TD3_L1, &bad]),
            Err(MrzError::InvalidCharacter('!'))
        ));
    }

    #[test]
    fn test_find_and_parse_skips_noise_and_normalizes() {
        let lines = vec![
            "Surname: ERIKSSON".to_string(),
            TD3_L1.to_lowercase(),
            format!("{} ", TD3_L2), // recognizers often append spaces
        ];
        let record = find_and_parse(&lines).unwrap();
        assert_eq!(record.document_number, "L898902C3");
    }

    #[test]
    fn test_find_and_parse_without_mrz() {
        let lines = vec!["JUST SOME TEXT".to_string()];
        assert!(find_and_parse(&lines).is_none());
    }

    #[test]
    fn test_single_identifier_name() {
        // Replace the name field with a primary identifier only.
        let l1 = "P<UTOERIKSSON<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<";
        let record = parse_mrz(&[l1, TD3_L2]).unwrap();
        assert_eq!(record.name, "ERIKSSON");
        assert_eq!(record.secondary_identifier, "");
    }
}
