//! `Disposition-Notification-Options` grammar.
//!
//! ```text
//! signed-receipt-protocol=<importance>, <protocol>; signed-receipt-micalg=<importance>, <alg>[, <alg>...]
//! ```
//!
//! Parameters other than the two above are carried but otherwise ignored.

use std::{fmt, str::FromStr};

use kestrel_security::DigestAlgorithm;

use crate::error::MdnError;

pub const SIGNED_RECEIPT_PROTOCOL: &str = "signed-receipt-protocol";
pub const SIGNED_RECEIPT_MICALG: &str = "signed-receipt-micalg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Required,
    Optional,
}

impl Importance {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
        }
    }
}

impl FromStr for Importance {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("required") {
            Ok(Self::Required)
        } else if value.eq_ignore_ascii_case("optional") {
            Ok(Self::Optional)
        } else {
            Err(())
        }
    }
}

/// One `name=<importance>, <value>[, <value>...]` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionParameter {
    pub name: String,
    pub importance: Importance,
    pub values: Vec<String>,
}

impl fmt::Display for OptionParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.importance.as_str())?;
        for value in &self.values {
            write!(f, ", {value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispositionOptions {
    parameters: Vec<OptionParameter>,
}

impl DispositionOptions {
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&OptionParameter> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn protocol(&self) -> Option<&OptionParameter> {
        self.parameter(SIGNED_RECEIPT_PROTOCOL)
    }

    #[must_use]
    pub fn micalg(&self) -> Option<&OptionParameter> {
        self.parameter(SIGNED_RECEIPT_MICALG)
    }

    /// The first requested MIC algorithm, known to this engine or not.
    #[must_use]
    pub fn first_micalg(&self) -> Option<&str> {
        self.micalg()
            .and_then(|micalg| micalg.values.first())
            .map(String::as_str)
    }

    /// A signed receipt is owed when the protocol is `required`, or
    /// `optional` together with a MIC algorithm.
    #[must_use]
    pub fn signing_requested(&self) -> bool {
        match self.protocol().map(|protocol| protocol.importance) {
            Some(Importance::Required) => true,
            Some(Importance::Optional) => self.first_micalg().is_some(),
            None => false,
        }
    }

    /// The first requested algorithm this engine knows, with the label the
    /// partner used for it.
    fn chosen_micalg(&self) -> Option<(DigestAlgorithm, &str)> {
        self.micalg()
            .into_iter()
            .flat_map(|micalg| micalg.values.iter())
            .find_map(|value| {
                value
                    .parse()
                    .ok()
                    .map(|algorithm| (algorithm, value.as_str()))
            })
    }

    /// MIC algorithm for the receipt: the first requested one this engine
    /// knows, otherwise SHA-1.
    #[must_use]
    pub fn mic_algorithm(&self) -> DigestAlgorithm {
        self.chosen_micalg()
            .map_or(DigestAlgorithm::Sha1, |(algorithm, _)| algorithm)
    }

    /// Whether the receipt MIC should echo the RFC 3851 spelling (`sha256`)
    /// because the partner requested [`Self::mic_algorithm`] that way.
    #[must_use]
    pub fn legacy_mic_label(&self) -> bool {
        self.chosen_micalg()
            .is_some_and(|(_, label)| DigestAlgorithm::is_legacy_label(label))
    }
}

impl FromStr for DispositionOptions {
    type Err = MdnError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| MdnError::Options {
            value: value.to_string(),
            reason,
        };

        let mut parameters = Vec::new();
        for parameter in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, rest) = parameter
                .split_once('=')
                .ok_or_else(|| invalid("parameter without '='"))?;

            let mut values = rest.split(',').map(str::trim);
            let importance = values
                .next()
                .and_then(|importance| importance.parse().ok())
                .ok_or_else(|| invalid("importance must be 'required' or 'optional'"))?;
            let values: Vec<String> = values
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                return Err(invalid("parameter has no values"));
            }

            parameters.push(OptionParameter {
                name: name.trim().to_ascii_lowercase(),
                importance,
                values,
            });
        }

        Ok(Self { parameters })
    }
}

impl fmt::Display for DispositionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, parameter) in self.parameters.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{parameter}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TYPICAL: &str = "signed-receipt-protocol=optional, pkcs7-signature; \
                           signed-receipt-micalg=optional, sha-256, sha1";

    #[test]
    fn test_parse_typical() {
        let options: DispositionOptions = TYPICAL.parse().unwrap();

        assert_eq!(options.protocol().unwrap().values, vec!["pkcs7-signature"]);
        assert_eq!(options.first_micalg(), Some("sha-256"));
        assert_eq!(options.mic_algorithm(), DigestAlgorithm::Sha256);
        assert!(options.signing_requested());
    }

    #[test]
    fn test_signing_requested_rules() {
        let required: DispositionOptions = "signed-receipt-protocol=required, pkcs7-signature"
            .parse()
            .unwrap();
        assert!(required.signing_requested());

        let optional_without_micalg: DispositionOptions =
            "signed-receipt-protocol=optional, pkcs7-signature".parse().unwrap();
        assert!(!optional_without_micalg.signing_requested());

        assert!(!DispositionOptions::default().signing_requested());
    }

    #[test]
    fn test_unknown_micalg_falls_back() {
        let options: DispositionOptions = "signed-receipt-micalg=optional, whirlpool, md5"
            .parse()
            .unwrap();
        assert_eq!(options.first_micalg(), Some("whirlpool"));
        assert_eq!(options.mic_algorithm(), DigestAlgorithm::Md5);

        assert_eq!(
            DispositionOptions::default().mic_algorithm(),
            DigestAlgorithm::Sha1
        );
        assert!(!DispositionOptions::default().legacy_mic_label());
    }

    #[test]
    fn test_legacy_label_follows_chosen_algorithm() {
        let options: DispositionOptions = "signed-receipt-micalg=optional, whirlpool, sha256"
            .parse()
            .unwrap();
        assert_eq!(options.mic_algorithm(), DigestAlgorithm::Sha256);
        assert!(options.legacy_mic_label());

        let options: DispositionOptions = "signed-receipt-micalg=optional, sha-256, sha1"
            .parse()
            .unwrap();
        assert!(!options.legacy_mic_label());
    }

    #[test]
    fn test_case_and_spacing() {
        let options: DispositionOptions =
            "Signed-Receipt-Protocol = REQUIRED ,pkcs7-signature ;".parse().unwrap();
        assert!(options.signing_requested());
    }

    #[test]
    fn test_invalid() {
        assert!("signed-receipt-protocol".parse::<DispositionOptions>().is_err());
        assert!(
            "signed-receipt-protocol=sometimes, pkcs7-signature"
                .parse::<DispositionOptions>()
                .is_err()
        );
        assert!("signed-receipt-micalg=optional".parse::<DispositionOptions>().is_err());
    }

    #[test]
    fn test_display() {
        let options: DispositionOptions = TYPICAL.parse().unwrap();
        assert_eq!(options.to_string(), TYPICAL);
    }
}
