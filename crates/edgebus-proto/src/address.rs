//! Composite source addresses.
//!
//! A fully-qualified virtual sub-device address is
//! `nodeId:groupId:majorId:minorId`. Missing trailing components default to
//! the empty string and are trimmed again when formatting, so
//! `parse("gate:door1")` round-trips as `"gate:door1"`.

use std::fmt;

/// Separator between address components.
pub const ID_SEPARATOR: char = ':';

const MAX_COMPONENTS: usize = 4;

/// Address of a virtual sub-device below a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SourceAddress {
    /// Owning node id, never empty.
    pub node_id: String,
    /// Virtual group id.
    pub group_id: String,
    /// Major device id within the group.
    pub major_id: String,
    /// Minor device id within the group.
    pub minor_id: String,
}

impl SourceAddress {
    /// Two-component form used by event publication: `nodeId:virtualId`.
    /// An empty `virtual_id` yields the bare node address.
    ///
    /// # Errors
    ///
    /// Returns error if `node_id` is empty or any component contains a
    /// reserved character.
    pub fn new(node_id: &str, virtual_id: &str) -> Result<Self, AddressError> {
        Self::qualified(node_id, virtual_id, "", "")
    }

    /// Fully-qualified four-component form.
    ///
    /// # Errors
    ///
    /// Returns error if `node_id` is empty or any component contains a
    /// reserved character.
    pub fn qualified(
        node_id: &str,
        group_id: &str,
        major_id: &str,
        minor_id: &str,
    ) -> Result<Self, AddressError> {
        if node_id.is_empty() {
            return Err(AddressError::EmptyNodeId);
        }
        for component in [node_id, group_id, major_id, minor_id] {
            validate_component(component)?;
        }
        Ok(Self {
            node_id: node_id.to_string(),
            group_id: group_id.to_string(),
            major_id: major_id.to_string(),
            minor_id: minor_id.to_string(),
        })
    }

    /// Parse a `:`-separated address, padding missing trailing components
    /// with empty strings.
    ///
    /// # Errors
    ///
    /// Returns error on an empty node id, more than four components, or a
    /// component containing a reserved character.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let parts: Vec<&str> = input.split(ID_SEPARATOR).collect();
        if parts.len() > MAX_COMPONENTS {
            return Err(AddressError::TooManyComponents { count: parts.len() });
        }
        let component = |index: usize| parts.get(index).copied().unwrap_or("");
        Self::qualified(component(0), component(1), component(2), component(3))
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![
            self.node_id.as_str(),
            self.group_id.as_str(),
            self.major_id.as_str(),
            self.minor_id.as_str(),
        ];
        while parts.len() > 1 && parts.last() == Some(&"") {
            parts.pop();
        }
        write!(f, "{}", parts.join(":"))
    }
}

/// Check that a single address component contains no reserved characters.
///
/// # Errors
///
/// Returns error if the component contains `/`, `:` or NUL.
pub fn validate_component(component: &str) -> Result<(), AddressError> {
    if component
        .chars()
        .any(|c| c == '/' || c == ID_SEPARATOR || c == '\0')
    {
        return Err(AddressError::InvalidComponent {
            component: component.to_string(),
        });
    }
    Ok(())
}

/// Errors raised while building or parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Node id must not be empty
    #[error("node id must not be empty")]
    EmptyNodeId,
    /// Component contains a reserved character
    #[error("address component contains a reserved character: {component:?}")]
    InvalidComponent {
        /// The offending component
        component: String,
    },
    /// More than four components
    #[error("address has too many components: {count}")]
    TooManyComponents {
        /// Observed component count
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_rejoin() {
        for input in ["gate", "gate:door1", "gate:door1:board2", "gate:a:b:c"] {
            let address = SourceAddress::parse(input).unwrap();
            assert_eq!(address.to_string(), input);
        }
    }

    #[test]
    fn missing_components_default_to_empty() {
        let address = SourceAddress::parse("gate:door1").unwrap();
        assert_eq!(address.node_id, "gate");
        assert_eq!(address.group_id, "door1");
        assert_eq!(address.major_id, "");
        assert_eq!(address.minor_id, "");
    }

    #[test]
    fn interior_empty_components_survive_formatting() {
        let address = SourceAddress::qualified("gate", "", "board", "").unwrap();
        assert_eq!(address.to_string(), "gate::board");
        assert_eq!(SourceAddress::parse("gate::board").unwrap(), address);
    }

    #[test]
    fn rejects_reserved_characters() {
        assert!(matches!(
            SourceAddress::new("ga/te", "d"),
            Err(AddressError::InvalidComponent { .. })
        ));
        assert!(matches!(
            SourceAddress::new("gate", "a:b"),
            Err(AddressError::InvalidComponent { .. })
        ));
    }

    #[test]
    fn rejects_empty_node_and_excess_components() {
        assert_eq!(SourceAddress::parse(""), Err(AddressError::EmptyNodeId));
        assert_eq!(
            SourceAddress::parse("a:b:c:d:e"),
            Err(AddressError::TooManyComponents { count: 5 })
        );
    }

    #[test]
    fn bare_node_address() {
        let address = SourceAddress::new("gate", "").unwrap();
        assert_eq!(address.to_string(), "gate");
    }
}
