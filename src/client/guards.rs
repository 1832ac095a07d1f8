use super::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    /// Onboarding for OAuth users that have not picked a role yet.
    CompleteProfile { token: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Allow,
    Redirect(Route),
}

pub fn auth_guard(session: Option<&Session>) -> GuardOutcome {
    match session {
        Some(s) if !s.token.is_empty() => GuardOutcome::Allow,
        _ => GuardOutcome::Redirect(Route::Login),
    }
}

/// A token in the query string takes precedence over the stored one. The
/// session must already describe the token's owner; use
/// `AuthShell::enter_market` to adopt a query token first.
pub fn market_guard(session: Option<&Session>, token_query: Option<&str>) -> GuardOutcome {
    let Some(session) = session else {
        return GuardOutcome::Redirect(Route::Login);
    };
    let token = token_query
        .filter(|t| !t.is_empty())
        .unwrap_or(session.token.as_str());
    if token.is_empty() {
        return GuardOutcome::Redirect(Route::Login);
    }
    if session.needs_onboarding() {
        return GuardOutcome::Redirect(Route::CompleteProfile {
            token: token.to_string(),
        });
    }
    GuardOutcome::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;
    use uuid::Uuid;

    fn session(role: Role, token: &str) -> Session {
        Session {
            id: Uuid::new_v4(),
            username: "u".into(),
            email: "u@example.com".into(),
            full_name: "U".into(),
            role,
            token: token.into(),
            profile_image: None,
        }
    }

    #[test]
    fn auth_guard_needs_a_session() {
        assert_eq!(auth_guard(None), GuardOutcome::Redirect(Route::Login));
        assert_eq!(auth_guard(Some(&session(Role::Pending, "t"))), GuardOutcome::Allow);
        assert_eq!(
            auth_guard(Some(&session(Role::Client, ""))),
            GuardOutcome::Redirect(Route::Login)
        );
    }

    #[test]
    fn market_guard_routes_by_role() {
        assert_eq!(market_guard(None, Some("t")), GuardOutcome::Redirect(Route::Login));
        assert_eq!(
            market_guard(Some(&session(Role::Seller, "stored")), None),
            GuardOutcome::Allow
        );
        assert_eq!(
            market_guard(Some(&session(Role::Pending, "stored")), None),
            GuardOutcome::Redirect(Route::CompleteProfile {
                token: "stored".into()
            })
        );
        assert_eq!(
            market_guard(Some(&session(Role::Pending, "stored")), Some("fresh")),
            GuardOutcome::Redirect(Route::CompleteProfile {
                token: "fresh".into()
            })
        );
    }
}
