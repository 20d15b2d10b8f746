use crate::SwapServer;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use subswap_core::Error;

/// An entity/action pair a caller may be granted, e.g. `onchain:read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permission {
    pub entity: &'static str,
    pub action: &'static str,
}

impl Permission {
    pub const ONCHAIN_READ: Permission = Permission::new("onchain", "read");
    pub const ONCHAIN_WRITE: Permission = Permission::new("onchain", "write");
    pub const OFFCHAIN_WRITE: Permission = Permission::new("offchain", "write");

    const KNOWN: [Permission; 3] = [
        Self::ONCHAIN_READ,
        Self::ONCHAIN_WRITE,
        Self::OFFCHAIN_WRITE,
    ];

    pub const fn new(entity: &'static str, action: &'static str) -> Self {
        Self { entity, action }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.action)
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::KNOWN
            .into_iter()
            .find(|p| p.to_string() == s)
            .ok_or_else(|| Error::invalid_parameters(format!("unknown permission: {s}")))
    }
}

/// Every operation the [`SwapServer`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ClientInit,
    ServiceInit,
    ClientWatch,
    UnspentAmount,
    RedeemFees,
    Redeem,
    Refund,
    SwapStatus,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::ClientInit,
        Operation::ServiceInit,
        Operation::ClientWatch,
        Operation::UnspentAmount,
        Operation::RedeemFees,
        Operation::Redeem,
        Operation::Refund,
        Operation::SwapStatus,
    ];

    pub fn required_permissions(&self) -> &'static [Permission] {
        match self {
            Operation::ClientInit | Operation::ServiceInit => &[Permission::OFFCHAIN_WRITE],
            Operation::ClientWatch
            | Operation::UnspentAmount
            | Operation::RedeemFees
            | Operation::SwapStatus => &[Permission::ONCHAIN_READ],
            Operation::Redeem | Operation::Refund => &[Permission::ONCHAIN_WRITE],
        }
    }
}

/// The permissions granted to a caller, as established by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    granted: HashSet<Permission>,
}

impl Credentials {
    pub fn new(granted: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
        }
    }

    /// Parse a list like `["onchain:read", "offchain:write"]`.
    pub fn parse<'a>(granted: impl IntoIterator<Item = &'a str>) -> Result<Self, Error> {
        let granted = granted
            .into_iter()
            .map(Permission::from_str)
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self { granted })
    }

    pub fn grants(&self, permission: &Permission) -> bool {
        self.granted.contains(permission)
    }
}

/// Decides whether a caller may perform an operation.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, credentials: &Credentials, operation: Operation) -> Result<(), Error>;
}

/// Allows an operation iff every permission it requires was granted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionTable;

impl Authorizer for PermissionTable {
    fn authorize(&self, credentials: &Credentials, operation: Operation) -> Result<(), Error> {
        let missing = operation
            .required_permissions()
            .iter()
            .filter(|p| !credentials.grants(p))
            .map(|p| p.to_string())
            .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(Error::permission_denied(format!(
                "{operation:?} requires {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }
}

/// Hands out the [`SwapServer`] only to callers allowed to perform the requested operation.
#[derive(Clone)]
pub struct AuthGate {
    server: Arc<SwapServer>,
    authorizer: Arc<dyn Authorizer>,
}

impl AuthGate {
    pub fn new(server: Arc<SwapServer>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { server, authorizer }
    }

    pub fn check(
        &self,
        credentials: &Credentials,
        operation: Operation,
    ) -> Result<&SwapServer, Error> {
        if let Err(e) = self.authorizer.authorize(credentials, operation) {
            tracing::warn!(?operation, "Denied swap operation: {e}");

            return Err(e);
        }

        Ok(&self.server)
    }
}
