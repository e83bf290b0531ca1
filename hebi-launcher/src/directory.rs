//! Directory lookups gating session creation.
//!
//! A user gets a session iff they are staff and neither root, a sysadmin nor
//! a functional account. Records are a snapshot taken per request and never
//! cached.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, Scope, SearchEntry, ldap_escape};
use serde::Serialize;
use thiserror::Error;

use crate::fedid::Fedid;

const PEOPLE_DN: &str = "ou=people,dc=diamond,dc=ac,dc=uk";
const GROUP_DN: &str = "ou=group,dc=diamond,dc=ac,dc=uk";

const STAFF_GROUP: &str = "dls_staff";
const SYSADMIN_GROUP: &str = "dls_sysadmin";
const FUNCTIONAL_GROUP: &str = "functional_accounts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryRecord {
    pub uid: i64,
    pub is_uid_root: bool,
    pub is_staff: bool,
    pub is_sysadmin: bool,
    pub is_functional: bool,
}

impl DirectoryRecord {
    pub fn is_eligible(&self) -> bool {
        self.is_staff && !self.is_uid_root && !self.is_sysadmin && !self.is_functional
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory bind failed")]
    Bind(#[source] ldap3::LdapError),
    #[error("directory search failed")]
    Search(#[source] ldap3::LdapError),
    #[error("no directory entry for {0}")]
    UnknownUser(Fedid),
    #[error("directory entry for {fedid} has no usable {attribute} attribute")]
    MissingAttribute { fedid: Fedid, attribute: &'static str },
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn lookup(&self, fedid: &Fedid) -> Result<DirectoryRecord, DirectoryError>;
}

pub struct LdapDirectory {
    url: String,
}

impl LdapDirectory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn is_member(ldap: &mut Ldap, group: &str, fedid: &Fedid) -> Result<bool, DirectoryError> {
        let (entries, _) = ldap
            .search(
                GROUP_DN,
                Scope::Subtree,
                &format!("(cn={group})"),
                vec!["memberUid"],
            )
            .await
            .map_err(DirectoryError::Search)?
            .success()
            .map_err(DirectoryError::Search)?;

        let is_member = entries
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .and_then(|entry| entry.attrs.get("memberUid").cloned())
            .is_some_and(|members| members.iter().any(|member| member == fedid.as_str()));

        Ok(is_member)
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn lookup(&self, fedid: &Fedid) -> Result<DirectoryRecord, DirectoryError> {
        let (conn, mut ldap) = LdapConnAsync::new(&self.url)
            .await
            .map_err(DirectoryError::Bind)?;
        ldap3::drive!(conn);

        // Anonymous bind: the attributes consulted here are world-readable.
        ldap.simple_bind("", "")
            .await
            .map_err(DirectoryError::Bind)?
            .success()
            .map_err(DirectoryError::Bind)?;

        let filter = format!("(uid={})", ldap_escape(fedid.as_str()));
        let (entries, _) = ldap
            .search(PEOPLE_DN, Scope::Subtree, &filter, vec!["uidNumber"])
            .await
            .map_err(DirectoryError::Search)?
            .success()
            .map_err(DirectoryError::Search)?;

        let entry = entries
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .ok_or_else(|| DirectoryError::UnknownUser(fedid.clone()))?;

        let uid = entry
            .attrs
            .get("uidNumber")
            .and_then(|values| values.first())
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| DirectoryError::MissingAttribute {
                fedid: fedid.clone(),
                attribute: "uidNumber",
            })?;

        let is_staff = Self::is_member(&mut ldap, STAFF_GROUP, fedid).await?;
        let is_sysadmin = Self::is_member(&mut ldap, SYSADMIN_GROUP, fedid).await?;
        let is_functional = Self::is_member(&mut ldap, FUNCTIONAL_GROUP, fedid).await?;

        let _ = ldap.unbind().await;

        Ok(DirectoryRecord {
            uid,
            is_uid_root: uid == 0,
            is_staff,
            is_sysadmin,
            is_functional,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff_record() -> DirectoryRecord {
        DirectoryRecord {
            uid: 10234,
            is_uid_root: false,
            is_staff: true,
            is_sysadmin: false,
            is_functional: false,
        }
    }

    #[test]
    fn staff_members_are_eligible() {
        assert!(staff_record().is_eligible());
    }

    #[test]
    fn everyone_else_is_not() {
        let mut root = staff_record();
        root.uid = 0;
        root.is_uid_root = true;
        assert!(!root.is_eligible());

        let mut sysadmin = staff_record();
        sysadmin.is_sysadmin = true;
        assert!(!sysadmin.is_eligible());

        let mut functional = staff_record();
        functional.is_functional = true;
        assert!(!functional.is_eligible());

        let mut outsider = staff_record();
        outsider.is_staff = false;
        assert!(!outsider.is_eligible());
    }
}
