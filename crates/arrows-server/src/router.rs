//! Connection routing: session lookup, authentication, role policy, attach.

use std::sync::Arc;

use arrows_core::{AttachOutcome, ConnectionId, ProtocolError, ResearcherId, Role, SessionId};
use tracing::debug;

use crate::auth::{Identity, PermissionChecker, Privilege, PrivilegeSet, TokenVerifier};
use crate::coordinator::SessionHandle;
use crate::registry::SessionRegistry;

/// A connection that passed every routing check and holds its slot.
#[derive(Clone, Debug)]
pub struct RoutedRole {
    /// Session the connection joined.
    pub session: SessionHandle,
    /// Slot it holds.
    pub role: Role,
    /// Who it is.
    pub identity: Identity,
    /// Whether the attach started the session.
    pub outcome: AttachOutcome,
}

/// Typed values from the `/socket/{sessionId}/{role}` path segments.
pub fn parse_route(session: &str, role: &str) -> Result<(SessionId, Role), ProtocolError> {
    let session_id = session
        .parse::<SessionId>()
        .map_err(|_| ProtocolError::Validation(format!("malformed session id '{session}'")))?;
    let role = role.parse::<Role>()?;
    Ok((session_id, role))
}

/// Decides whether a connection may take a role.
pub struct ConnectionRouter {
    registry: Arc<SessionRegistry>,
    verifier: Arc<dyn TokenVerifier>,
    permissions: Arc<dyn PermissionChecker>,
}

impl ConnectionRouter {
    /// Router over `registry` with the given policy collaborators.
    pub fn new(
        registry: Arc<SessionRegistry>,
        verifier: Arc<dyn TokenVerifier>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            registry,
            verifier,
            permissions,
        }
    }

    /// The registry sessions are resolved in.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Route `connection` to `role` of `session_id`.
    ///
    /// Checks run in order and stop at the first failure: unknown session
    /// (`NotFound`), bad or missing token (`Authentication`), role policy
    /// (`Authorization`), then the attach itself (`Conflict` or `State`).
    pub async fn accept(
        &self,
        connection: ConnectionId,
        session_id: SessionId,
        role: Role,
        credentials: Option<&str>,
    ) -> Result<RoutedRole, ProtocolError> {
        let session = self
            .registry
            .find(&session_id)
            .ok_or_else(|| ProtocolError::NotFound(format!("unknown session {session_id}")))?;

        let token = credentials
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ProtocolError::Authentication("missing token".into()))?;
        let identity = self.verifier.verify(token)?;
        let privileges = self.permissions.privileges(&identity);

        authorize(role, &identity, &privileges, session.researcher())?;
        debug!(session_id = %session_id, role = %role, subject = %identity.subject, "connection authorised");

        let outcome = session.attach(connection, role).await?;
        Ok(RoutedRole {
            session,
            role,
            identity,
            outcome,
        })
    }
}

/// Observer needs Researcher and must own the session; subjects need Subject or Admin.
fn authorize(
    role: Role,
    identity: &Identity,
    privileges: &PrivilegeSet,
    researcher: ResearcherId,
) -> Result<(), ProtocolError> {
    match role {
        Role::Observer => {
            if !privileges.contains(Privilege::Researcher) {
                return Err(ProtocolError::Authorization(
                    "observer role requires researcher privilege".into(),
                ));
            }
            let owns_session = identity
                .subject
                .parse::<ResearcherId>()
                .is_ok_and(|id| id == researcher);
            if !owns_session {
                return Err(ProtocolError::Authorization(
                    "only the session's researcher may observe".into(),
                ));
            }
            Ok(())
        }
        Role::Subject(_) => {
            if privileges.contains_any(&[Privilege::Subject, Privilege::Admin]) {
                Ok(())
            } else {
                Err(ProtocolError::Authorization(format!(
                    "role {role} requires subject privilege"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RoleClaimPermissions;
    use crate::coordinator::{CoordinatorDeps, CoordinatorOptions};
    use crate::transport::ConnectionHub;
    use arrows_core::{
        ErrorKind, Orientation, Position, Scenario, Session, SubjectId, SubjectRole,
        SubjectsCouple, SystemClock, Trial, TrialList,
    };
    use assert_matches::assert_matches;

    const ONE: Role = Role::Subject(SubjectRole::One);

    /// Accepts `<subject>|<ROLE,ROLE>`; anything else is rejected.
    struct FakeVerifier;

    impl TokenVerifier for FakeVerifier {
        fn verify(&self, token: &str) -> Result<Identity, ProtocolError> {
            let (subject, roles) = token
                .split_once('|')
                .ok_or_else(|| ProtocolError::Authentication("bad token".into()))?;
            Ok(Identity {
                subject: subject.to_string(),
                roles: roles
                    .split(',')
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        }
    }

    struct Fixture {
        router: ConnectionRouter,
        session: SessionId,
        researcher: ResearcherId,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new(CoordinatorDeps {
            transport: Arc::new(ConnectionHub::new(8)),
            clock: Arc::new(SystemClock),
            options: CoordinatorOptions::default(),
        }));
        let researcher = ResearcherId::new();
        let trial = Trial::new(Position::Top, vec![Orientation::Left]).unwrap();
        let handle = registry.persist(Session::new(
            SessionId::new(),
            Scenario::new(TrialList::new(vec![trial]).unwrap()),
            SubjectsCouple::new(SubjectId::new(), SubjectId::new()),
            researcher,
        ));
        Fixture {
            router: ConnectionRouter::new(
                registry,
                Arc::new(FakeVerifier),
                Arc::new(RoleClaimPermissions),
            ),
            session: handle.id(),
            researcher,
        }
    }

    #[test]
    fn parse_route_accepts_valid_segments() {
        let (id, role) = parse_route("ddf5ddfa-0990-4c30-9c4c-db2214ed06c1", "two").unwrap();
        assert_eq!(id.to_string(), "ddf5ddfa-0990-4c30-9c4c-db2214ed06c1");
        assert_eq!(role, Role::Subject(SubjectRole::Two));
    }

    #[test]
    fn parse_route_rejects_bad_segments() {
        assert_matches!(parse_route("nope", "one"), Err(ProtocolError::Validation(_)));
        assert_matches!(
            parse_route("ddf5ddfa-0990-4c30-9c4c-db2214ed06c1", "three"),
            Err(ProtocolError::Validation(_))
        );
    }

    #[tokio::test]
    async fn unknown_session_wins_over_missing_token() {
        let f = fixture();
        let err = f
            .router
            .accept(ConnectionId::new(), SessionId::new(), ONE, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_authentication() {
        let f = fixture();
        for credentials in [None, Some(""), Some("garbage")] {
            let err = f
                .router
                .accept(ConnectionId::new(), f.session, ONE, credentials)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Authentication);
        }
    }

    #[tokio::test]
    async fn subject_needs_subject_or_admin() {
        let f = fixture();
        let err = f
            .router
            .accept(ConnectionId::new(), f.session, ONE, Some("someone|ROLE_RESEARCHER"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let routed = f
            .router
            .accept(ConnectionId::new(), f.session, ONE, Some("someone|ROLE_ADMIN"))
            .await
            .unwrap();
        assert_eq!(routed.role, ONE);
        assert_eq!(routed.outcome, AttachOutcome::Attached);
    }

    #[tokio::test]
    async fn observer_must_own_the_session() {
        let f = fixture();
        let stranger = format!("{}|ROLE_RESEARCHER", ResearcherId::new());
        let err = f
            .router
            .accept(ConnectionId::new(), f.session, Role::Observer, Some(&stranger))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let owner_without_privilege = format!("{}|ROLE_SUBJECT", f.researcher);
        let err = f
            .router
            .accept(ConnectionId::new(), f.session, Role::Observer, Some(&owner_without_privilege))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let owner = format!("{}|ROLE_RESEARCHER", f.researcher);
        let routed = f
            .router
            .accept(ConnectionId::new(), f.session, Role::Observer, Some(&owner))
            .await
            .unwrap();
        assert_eq!(routed.identity.subject, f.researcher.to_string());
    }

    #[tokio::test]
    async fn second_connection_for_role_is_conflict() {
        let f = fixture();
        let _ = f
            .router
            .accept(ConnectionId::new(), f.session, ONE, Some("a|ROLE_SUBJECT"))
            .await
            .unwrap();
        let err = f
            .router
            .accept(ConnectionId::new(), f.session, ONE, Some("b|ROLE_SUBJECT"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn terminal_session_is_state_error() {
        let f = fixture();
        let handle = f.router.registry().find(&f.session).unwrap();
        handle.shutdown("done").await;
        assert!(handle.wait_for_status(arrows_core::SessionStatus::Aborted).await);
        let err = f
            .router
            .accept(ConnectionId::new(), f.session, ONE, Some("a|ROLE_SUBJECT"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }
}
