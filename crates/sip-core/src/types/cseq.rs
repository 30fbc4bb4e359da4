//! The CSeq header value

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::method::Method;

/// A CSeq value: sequence number plus method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split_whitespace();
        let seq = parts
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::InvalidHeaderValue {
                field: "CSeq",
                value: s.to_string(),
            })?;
        let method = parts
            .next()
            .map(|m| m.parse::<Method>().expect("method parse is infallible"))
            .ok_or_else(|| Error::InvalidHeaderValue {
                field: "CSeq",
                value: s.to_string(),
            })?;
        Ok(CSeq { seq, method })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let cseq: CSeq = "314159 INVITE".parse().unwrap();
        assert_eq!(cseq.seq, 314159);
        assert_eq!(cseq.method, Method::Invite);
        assert_eq!(cseq.to_string(), "314159 INVITE");
    }

    #[test]
    fn rejects_missing_method() {
        assert!("42".parse::<CSeq>().is_err());
        assert!("".parse::<CSeq>().is_err());
    }
}
