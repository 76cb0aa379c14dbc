use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A destination cell in A1 notation. Both coordinates are 1-based.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellAddress {
    pub row: u32,
    pub col: u16,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid cell name '{0}'")]
pub struct ParseCellError(pub String);

impl CellAddress {
    pub fn new(row: u32, col: u16) -> Self {
        CellAddress { row, col }
    }

    /// Zero-based (row, col) as used by the xlsx writer.
    pub fn zero_based(&self) -> (u32, u16) {
        (self.row.saturating_sub(1), self.col.saturating_sub(1))
    }

    pub fn col_letters(&self) -> String {
        col_to_letter(self.col)
    }
}

pub fn col_to_letter(col: u16) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// Returns `None` past column XFD or for anything that is not a letter.
pub fn letter_to_col(letters: &str) -> Option<u16> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let col = letters.chars().try_fold(0u32, |acc, c| {
        c.is_ascii_alphabetic()
            .then(|| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1))
    })?;
    u16::try_from(col).ok().filter(|c| *c <= 16_384)
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letter(self.col), self.row)
    }
}

impl FromStr for CellAddress {
    type Err = ParseCellError;

    fn from_str(cell_name: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseCellError(cell_name.to_string());
        let mut letters = String::new();
        let mut digits = String::new();

        for c in cell_name.trim().chars() {
            if c.is_ascii_alphabetic() {
                if !digits.is_empty() {
                    return Err(invalid());
                }
                letters.push(c);
            } else if c.is_ascii_digit() {
                digits.push(c);
            } else {
                return Err(invalid());
            }
        }

        let col = letter_to_col(&letters).ok_or_else(invalid)?;
        let row = digits.parse::<u32>().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Ok(CellAddress { row, col })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(col_to_letter(1), "A");
        assert_eq!(col_to_letter(8), "H");
        assert_eq!(col_to_letter(26), "Z");
        assert_eq!(col_to_letter(27), "AA");
        assert_eq!(col_to_letter(52), "AZ");
        assert_eq!(letter_to_col("m"), Some(13));
        assert_eq!(letter_to_col("AZ"), Some(52));
        assert_eq!(letter_to_col("XFE"), None);
        assert_eq!(letter_to_col(""), None);
    }

    #[test]
    fn parse_and_display() {
        let cell: CellAddress = "H4".parse().unwrap();
        assert_eq!(cell, CellAddress::new(4, 8));
        assert_eq!(cell.to_string(), "H4");
        assert_eq!(cell.zero_based(), (3, 7));
        assert_eq!("ab12".parse(), Ok(CellAddress::new(12, 28)));
    }

    #[test]
    fn reject_malformed_names() {
        for bad in ["", "4H", "H", "12", "H0", "H4A", "H-4"] {
            assert!(bad.parse::<CellAddress>().is_err(), "{} should not parse", bad);
        }
    }
}
