//! Identifier validation.
//!
//! Declared names (functions, types, variants, active-pattern cases) must
//! be non-empty ASCII identifiers: letters, digits and `_`, never starting
//! with a digit.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    #[error("identifiers must not be empty")]
    Empty,
    #[error("`{code_point}` at index {index} is not a valid identifier character")]
    InvalidCodePoint { code_point: char, index: usize },
    #[error("identifiers must not start with a digit")]
    LeadingDigit,
}

pub fn validate_identifier(name: &str) -> Result<(), InvalidIdentifier> {
    let mut chars = name.chars().enumerate();
    let Some((_, first)) = chars.next() else {
        return Err(InvalidIdentifier::Empty);
    };
    if first.is_ascii_digit() {
        return Err(InvalidIdentifier::LeadingDigit);
    }
    let bad = std::iter::once((0, first))
        .chain(chars)
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'));
    match bad {
        Some((index, code_point)) => Err(InvalidIdentifier::InvalidCodePoint { code_point, index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["x", "add", "_tmp", "Some", "u8", "snake_case_2"] {
            assert_eq!(validate_identifier(name), Ok(()), "{name}");
        }
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(validate_identifier(""), Err(InvalidIdentifier::Empty));
        assert_eq!(
            validate_identifier("1abc"),
            Err(InvalidIdentifier::LeadingDigit)
        );
        assert_eq!(
            validate_identifier("a-b"),
            Err(InvalidIdentifier::InvalidCodePoint {
                code_point: '-',
                index: 1
            })
        );
        assert_eq!(
            validate_identifier("caf\u{e9}"),
            Err(InvalidIdentifier::InvalidCodePoint {
                code_point: '\u{e9}',
                index: 3
            })
        );
    }

    proptest! {
        #[test]
        fn generated_identifiers_validate(name in "[A-Za-z_][A-Za-z0-9_]{0,16}") {
            prop_assert_eq!(validate_identifier(&name), Ok(()));
        }

        #[test]
        fn any_non_identifier_char_is_reported(
            prefix in "[a-z]{1,4}",
            bad in "[ !@#%^&*().,;:+=-]",
        ) {
            let name = format!("{prefix}{bad}");
            let is_invalid_code_point = matches!(
                validate_identifier(&name),
                Err(InvalidIdentifier::InvalidCodePoint { .. })
            );
            prop_assert!(is_invalid_code_point);
        }
    }
}
