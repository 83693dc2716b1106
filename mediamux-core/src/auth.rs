//! Authenticator (C1): IP ACL, external HTTP callout, and local credential
//! checks, in that order.
//!
//! Grounded in the teacher's external-auth-callout pattern (`synctv`'s
//! backend validating session tokens over HTTP before admitting a
//! connection) generalized to the three credential shapes the data model
//! defines. Constant-time comparison (`subtle`) on every locally-checked
//! credential defeats timing side-channels; the external callout reuses the
//! process-wide `reqwest::Client` so connections are pooled across
//! authentication requests.

use std::net::IpAddr;
use std::time::Duration;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use ipnet::IpNet;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::PathConfig;
use crate::error::AuthFailure;
use crate::model::{AccessRequest, Credential, CredentialKind};

/// Checks `req` against `path_config`'s IP ACL, then (if configured) an
/// external authentication service, then local credentials. The first
/// applicable check that fails wins.
pub async fn authenticate(
    req: &AccessRequest,
    path_config: &PathConfig,
    external_url: Option<&str>,
    http: &reqwest::Client,
) -> Result<(), AuthFailure> {
    let ips = match req.action {
        crate::model::Action::Publish => &path_config.publish_ips,
        crate::model::Action::Read => &path_config.read_ips,
    };
    check_ip_acl(req.ip, ips)?;

    if let Some(url) = external_url {
        check_external(req, url, http).await?;
    }

    let (user, pass) = match req.action {
        crate::model::Action::Publish => (&path_config.publish_user, &path_config.publish_pass),
        crate::model::Action::Read => (&path_config.read_user, &path_config.read_pass),
    };
    check_local_credentials(req, user.as_ref(), pass.as_ref())
}

fn check_ip_acl(ip: IpAddr, allowed: &[String]) -> Result<(), AuthFailure> {
    if allowed.is_empty() {
        return Ok(());
    }
    let matches = allowed.iter().any(|entry| match entry.parse::<IpNet>() {
        Ok(net) => net.contains(&ip),
        Err(_) => entry.parse::<IpAddr>().is_ok_and(|a| a == ip),
    });
    if matches {
        Ok(())
    } else {
        Err(AuthFailure::Critical {
            response: "403 Forbidden".to_string(),
            message: format!("ip {ip} not in allow list"),
        })
    }
}

async fn check_external(
    req: &AccessRequest,
    url: &str,
    http: &reqwest::Client,
) -> Result<(), AuthFailure> {
    let response = http
        .post(url)
        .timeout(Duration::from_secs(5))
        .json(req)
        .send()
        .await
        .map_err(|e| AuthFailure::Critical {
            response: "500 Internal Server Error".to_string(),
            message: format!("external authentication request failed: {e}"),
        })?;

    if response.status().is_success() {
        Ok(())
    } else if response.status().as_u16() == 401 {
        Err(AuthFailure::NotCritical {
            response: "401 Unauthorized".to_string(),
        })
    } else {
        Err(AuthFailure::Critical {
            response: "403 Forbidden".to_string(),
            message: format!("external authentication rejected with {}", response.status()),
        })
    }
}

fn check_local_credentials(
    req: &AccessRequest,
    user: Option<&Credential>,
    pass: Option<&Credential>,
) -> Result<(), AuthFailure> {
    let (Some(user), Some(pass)) = (user, pass) else {
        return Ok(());
    };
    if user.is_empty() && pass.is_empty() {
        return Ok(());
    }

    let user_ok = constant_time_eq_str(&user.0, &req.user);
    let pass_ok = verify_password_credential(pass, &req.pass);

    if user_ok && pass_ok {
        Ok(())
    } else if req.user.is_empty() && req.pass.is_empty() {
        // No credentials presented yet: ask for them rather than rejecting
        // outright, so an RTSP client gets a retriable challenge.
        Err(AuthFailure::NotCritical {
            response: "401 Unauthorized".to_string(),
        })
    } else {
        Err(AuthFailure::Critical {
            response: "401 Unauthorized".to_string(),
            message: "invalid credentials".to_string(),
        })
    }
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn verify_password_credential(expected: &Credential, presented: &str) -> bool {
    match expected.kind() {
        CredentialKind::Plaintext(p) => constant_time_eq_str(&p, presented),
        CredentialKind::Sha256(expected_b64) => {
            let digest = Sha256::digest(presented.as_bytes());
            let presented_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, digest);
            constant_time_eq_str(&expected_b64, &presented_b64)
        }
        CredentialKind::Argon2(phc) => {
            let Ok(hash) = PasswordHash::new(&phc) else {
                return false;
            };
            Argon2::default()
                .verify_password(presented.as_bytes(), &hash)
                .is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Protocol};
    use std::net::Ipv4Addr;

    fn req(user: &str, pass: &str) -> AccessRequest {
        AccessRequest {
            path_name: "cam1".to_string(),
            query: String::new(),
            user: user.to_string(),
            pass: pass.to_string(),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            protocol: Protocol::Rtsp,
            action: Action::Publish,
            id: None,
        }
    }

    #[test]
    fn ip_acl_rejects_outside_allow_list() {
        let err = check_ip_acl(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), &["10.0.0.0/8".to_string()])
            .unwrap_err();
        assert!(matches!(err, AuthFailure::Critical { .. }));
    }

    #[test]
    fn ip_acl_accepts_cidr_match() {
        check_ip_acl(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), &["10.0.0.0/8".to_string()]).unwrap();
    }

    #[test]
    fn plaintext_credential_round_trips() {
        let expected = Credential("secret".to_string());
        assert!(verify_password_credential(&expected, "secret"));
        assert!(!verify_password_credential(&expected, "wrong"));
    }

    #[test]
    fn sha256_credential_matches_digest() {
        let digest = Sha256::digest(b"hunter2");
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, digest);
        let expected = Credential(format!("sha256:{b64}"));
        assert!(verify_password_credential(&expected, "hunter2"));
        assert!(!verify_password_credential(&expected, "hunter3"));
    }

    #[test]
    fn no_configured_credentials_allows_anything() {
        check_local_credentials(&req("anyone", "anything"), None, None).unwrap();
    }

    #[test]
    fn missing_credentials_get_a_retriable_challenge() {
        let user = Credential("alice".to_string());
        let pass = Credential("s3cret".to_string());
        let err = check_local_credentials(&req("", ""), Some(&user), Some(&pass)).unwrap_err();
        assert!(matches!(err, AuthFailure::NotCritical { .. }));
    }

    #[test]
    fn wrong_credentials_are_a_critical_failure() {
        let user = Credential("alice".to_string());
        let pass = Credential("s3cret".to_string());
        let err = check_local_credentials(&req("alice", "nope"), Some(&user), Some(&pass)).unwrap_err();
        assert!(matches!(err, AuthFailure::Critical { .. }));
    }
}
