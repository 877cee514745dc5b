// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subject naming.
//!
//! For a service (or namespace) named `Math`:
//!
//! | Purpose | Subject |
//! |---|---|
//! | Direct call to one peer | `rpc.Math.call.<peer-id>` |
//! | Multicast call | `rpc.Math.mcall` |
//! | Multicast cast | `rpc.Math.mcast` |
//! | Reply delivery | `rpc.Math.inbox.<peer-name>` |

use crate::config::{CALL_SEGMENT, INBOX_SEGMENT, MCALL_SEGMENT, MCAST_SEGMENT, SUBJECT_ROOT};

/// Subjects rooted at `rpc.<namespace>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    base: String,
}

impl Subjects {
    /// Subjects for one namespace
    pub fn new(namespace: &str) -> Self {
        Self {
            base: format!("{}.{}", SUBJECT_ROOT, namespace),
        }
    }

    /// `rpc.<namespace>`
    pub fn base(&self) -> &str {
        &self.base
    }

    /// `rpc.<namespace>.call.<peer-id>`
    pub fn call(&self, peer_id: &str) -> String {
        format!("{}.{}.{}", self.base, CALL_SEGMENT, peer_id)
    }

    /// `rpc.<namespace>.mcall`
    pub fn mcall(&self) -> String {
        format!("{}.{}", self.base, MCALL_SEGMENT)
    }

    /// `rpc.<namespace>.mcast`
    pub fn mcast(&self) -> String {
        format!("{}.{}", self.base, MCAST_SEGMENT)
    }

    /// `rpc.<namespace>.inbox.<peer-name>`
    pub fn inbox(&self, peer_name: &str) -> String {
        format!("{}.{}.{}", self.base, INBOX_SEGMENT, peer_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_strings() {
        let subjects = Subjects::new("Math");
        assert_eq!(subjects.base(), "rpc.Math");
        assert_eq!(subjects.call("host-42.3"), "rpc.Math.call.host-42.3");
        assert_eq!(subjects.mcall(), "rpc.Math.mcall");
        assert_eq!(subjects.mcast(), "rpc.Math.mcast");
        assert_eq!(subjects.inbox("host-42"), "rpc.Math.inbox.host-42");
    }
}
