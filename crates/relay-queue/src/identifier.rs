//! The caller resolving priority (§4.4): a request carries a user token when
//! one was supplied; otherwise it falls back to a shared-IP marker (an
//! operator-configured set of aggregator/NAT IPs that would otherwise look
//! like a single abusive client) and finally the bare client IP.

use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identifier {
    User(String),
    SharedIp(String),
    ClientIp(String),
}

impl Identifier {
    pub fn resolve(user_token: Option<&str>, shared_ips: &HashSet<String>, client_ip: &str) -> Self {
        if let Some(token) = user_token {
            return Identifier::User(token.to_string());
        }
        if shared_ips.contains(client_ip) {
            return Identifier::SharedIp(client_ip.to_string());
        }
        Identifier::ClientIp(client_ip.to_string())
    }

    /// Concurrent queue slots this identity may occupy: shared IPs stand in
    /// for many real clients, so they get a wider allowance.
    pub fn occupancy_limit(&self) -> usize {
        match self {
            Identifier::SharedIp(_) => 5,
            _ => 1,
        }
    }

    pub fn is_shared_ip(&self) -> bool {
        matches!(self, Identifier::SharedIp(_))
    }

    pub(crate) fn occupancy_key(&self) -> String {
        match self {
            Identifier::User(t) => format!("user:{t}"),
            Identifier::SharedIp(ip) => format!("shared:{ip}"),
            Identifier::ClientIp(ip) => format!("ip:{ip}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_token_wins_over_everything() {
        let shared: HashSet<String> = ["1.2.3.4".to_string()].into_iter().collect();
        let id = Identifier::resolve(Some("tok-1"), &shared, "1.2.3.4");
        assert_eq!(id, Identifier::User("tok-1".to_string()));
    }

    #[test]
    fn shared_ip_beats_plain_client_ip() {
        let shared: HashSet<String> = ["1.2.3.4".to_string()].into_iter().collect();
        let id = Identifier::resolve(None, &shared, "1.2.3.4");
        assert_eq!(id, Identifier::SharedIp("1.2.3.4".to_string()));
    }

    #[test]
    fn falls_back_to_client_ip() {
        let id = Identifier::resolve(None, &HashSet::new(), "9.9.9.9");
        assert_eq!(id, Identifier::ClientIp("9.9.9.9".to_string()));
    }

    #[test]
    fn occupancy_limits_match_the_shared_ip_allowance() {
        assert_eq!(Identifier::User("x".into()).occupancy_limit(), 1);
        assert_eq!(Identifier::ClientIp("x".into()).occupancy_limit(), 1);
        assert_eq!(Identifier::SharedIp("x".into()).occupancy_limit(), 5);
    }
}
