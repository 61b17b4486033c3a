//! Request and response types

use crate::domain::locking::{OperationKind, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation named by a request
///
/// Tags are read from the batch format's numeric codes (`1`, `2`, `3`) or
/// from the operation names, case-insensitively. Anything else is kept as
/// `Unknown` and answered with `false` without touching the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Lock,
    Unlock,
    Upgrade,
    Unknown(String),
}

impl Operation {
    /// Interpret an operation tag
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim();
        match tag.to_ascii_lowercase().as_str() {
            "1" | "lock" => Self::Lock,
            "2" | "unlock" => Self::Unlock,
            "3" | "upgrade" => Self::Upgrade,
            _ => Self::Unknown(tag.to_string()),
        }
    }

    /// The tree operation, if the tag was recognised
    pub fn kind(&self) -> Option<OperationKind> {
        match self {
            Self::Lock => Some(OperationKind::Lock),
            Self::Unlock => Some(OperationKind::Unlock),
            Self::Upgrade => Some(OperationKind::Upgrade),
            Self::Unknown(_) => None,
        }
    }
}

impl FromStr for Operation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for Operation {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl From<Operation> for String {
    fn from(operation: Operation) -> Self {
        operation.to_string()
    }
}

impl From<OperationKind> for Operation {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Lock => Self::Lock,
            OperationKind::Unlock => Self::Unlock,
            OperationKind::Upgrade => Self::Upgrade,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lock => write!(f, "Lock"),
            Self::Unlock => write!(f, "Unlock"),
            Self::Upgrade => write!(f, "Upgrade"),
            Self::Unknown(tag) => write!(f, "{}", tag),
        }
    }
}

/// One request against the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Position in the input
    pub seq: usize,
    pub operation: Operation,
    pub user_id: UserId,
    pub node_name: String,
}

impl Request {
    pub fn new(
        seq: usize,
        operation: impl Into<Operation>,
        node_name: impl Into<String>,
        user_id: UserId,
    ) -> Self {
        Self {
            seq,
            operation: operation.into(),
            user_id,
            node_name: node_name.into(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.operation, self.node_name, self.user_id)
    }
}

/// Outcome of a request, paired with the request itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request: Request,
    pub result: bool,
    /// Position in the tree's history; `None` if the tree was never touched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<u64>,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request: {}, Result: {}", self.request, self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_codes() {
        assert_eq!(Operation::parse("1"), Operation::Lock);
        assert_eq!(Operation::parse("2"), Operation::Unlock);
        assert_eq!(Operation::parse("3"), Operation::Upgrade);
        assert_eq!(Operation::parse("4"), Operation::Unknown("4".to_string()));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(Operation::parse("Lock"), Operation::Lock);
        assert_eq!(Operation::parse("UNLOCK"), Operation::Unlock);
        assert_eq!(Operation::parse(" upgrade "), Operation::Upgrade);
        assert_eq!(
            "Downgrade".parse::<Operation>(),
            Ok(Operation::Unknown("Downgrade".to_string()))
        );
    }

    #[test]
    fn test_kind() {
        assert_eq!(Operation::Lock.kind(), Some(OperationKind::Lock));
        assert_eq!(Operation::Unknown("x".into()).kind(), None);
        assert_eq!(Operation::from(OperationKind::Upgrade), Operation::Upgrade);
    }

    #[test]
    fn test_display() {
        let request = Request::new(0, Operation::Lock, "china", 9);
        assert_eq!(request.to_string(), "Lock china 9");

        let response = Response {
            request,
            result: true,
            ticket: Some(0),
        };
        assert_eq!(response.to_string(), "Request: Lock china 9, Result: true");

        let request = Request::new(1, Operation::parse("7"), "india", 2);
        assert_eq!(request.to_string(), "7 india 2");
    }

    #[test]
    fn test_json_shape() {
        let response = Response {
            request: Request::new(3, OperationKind::Unlock, "n2", 7),
            result: false,
            ticket: Some(12),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["request"]["operation"], "Unlock");
        assert_eq!(json["request"]["seq"], 3);
        assert_eq!(json["request"]["node_name"], "n2");
        assert_eq!(json["result"], false);
        assert_eq!(json["ticket"], 12);

        let back: Response = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
