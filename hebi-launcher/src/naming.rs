//! Naming conventions for the per-user Kubernetes objects.
//!
//! The rest of the system depends on these contracts: the reaper recovers the
//! owner from the pod label, and the ingress route must point at the service
//! created for the same user.

use crate::fedid::Fedid;

/// Field manager identifier used for all ingress patches.
pub const INGRESS_FIELD_MANAGER: &str = "hebi-launcher";

/// Port every session container listens on.
pub const SESSION_PORT: i32 = 8080;

pub fn deployment_name(fedid: &Fedid) -> String {
    format!("hebi-{fedid}")
}

pub fn service_name(fedid: &Fedid) -> String {
    format!("hebi-service-{fedid}")
}

pub fn app_label_value(fedid: &Fedid) -> String {
    format!("hebi-{fedid}")
}

pub fn app_label_selector(fedid: &Fedid) -> String {
    format!("app=hebi-{fedid}")
}

pub fn ingress_path(fedid: &Fedid) -> String {
    format!("/{fedid}(/|$)(.*)")
}

/// Recovers the owner of a session pod from its `app` label.
///
/// The launcher's own pod carries a `launcher` label and is never a session.
pub fn user_from_app_label(label: &str) -> Option<Fedid> {
    if label.contains("launcher") {
        return None;
    }

    label.strip_prefix("hebi-")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fedid(s: &str) -> Fedid {
        s.parse().unwrap()
    }

    #[test]
    fn names_follow_the_conventions() {
        let user = fedid("abc12345");
        assert_eq!(deployment_name(&user), "hebi-abc12345");
        assert_eq!(service_name(&user), "hebi-service-abc12345");
        assert_eq!(app_label_selector(&user), "app=hebi-abc12345");
        assert_eq!(ingress_path(&user), "/abc12345(/|$)(.*)");
    }

    #[test]
    fn owner_is_recovered_from_the_app_label() {
        assert_eq!(user_from_app_label("hebi-abc12345"), Some(fedid("abc12345")));
        assert_eq!(user_from_app_label("hebi-launcher"), None);
        assert_eq!(user_from_app_label("something-else"), None);
        assert_eq!(user_from_app_label("hebi-"), None);
    }
}
