use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::extract::extract_code;
use crate::license::{CodeAuthority, Validation, REASON_CODE_USED, REASON_SERVICE_DOWN};
use crate::onebot::{GroupHost, JoinRequestEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

/// Pure mapping from a validation outcome to the approve/reject decision.
/// The three rejection reasons stay distinct so the applicant can tell a
/// consumed code from a bad one from an outage.
pub fn decide(validation: &Validation) -> Decision {
    match validation {
        Validation::Valid => Decision::Approve,
        Validation::AlreadyUsed => Decision::Reject {
            reason: REASON_CODE_USED.to_string(),
        },
        Validation::Invalid { message } => Decision::Reject {
            reason: message.clone(),
        },
        Validation::Unavailable => Decision::Reject {
            reason: REASON_SERVICE_DOWN.to_string(),
        },
    }
}

/// How a join request ended. `Approved` carries the detached mark-used task;
/// callers may await it for observation but the approval never depends on it.
#[derive(Debug)]
pub enum Resolution {
    /// Not a group add-type request; nothing was done.
    Ignored,
    Approved { mark_used: JoinHandle<()> },
    Rejected { reason: String },
}

/// Runs one join request to a terminal state: extract, validate, then exactly
/// one approve-or-reject call to the platform. Never returns an error: a
/// licensing outage becomes a reject, and a failed platform call is logged.
pub async fn handle_join_request(
    host: &dyn GroupHost,
    authority: Arc<dyn CodeAuthority>,
    ev: &JoinRequestEvent,
) -> Resolution {
    if ev.request_type != "group" || ev.sub_type != "add" {
        return Resolution::Ignored;
    }

    // 没提取到卡密也照常送检：有效性由远端说了算。
    let code = extract_code(&ev.comment).unwrap_or("");
    info!(
        "join request: group={} user={} comment={:?} code={:?}",
        ev.group_id, ev.user_id, ev.comment, code
    );

    let validation = authority.check(ev.group_id, code).await;

    match decide(&validation) {
        Decision::Approve => {
            info!(
                "code accepted: group={} user={} code={}",
                ev.group_id, ev.user_id, code
            );
            if let Err(e) = host.set_group_add_request(&ev.flag, true, None).await {
                warn!(
                    "approve call failed: group={} user={} err={}",
                    ev.group_id, ev.user_id, e
                );
            }
            let (group_id, user_id, code) = (ev.group_id, ev.user_id, code.to_string());
            let mark_used = tokio::spawn(async move {
                authority.mark_used(group_id, &code, user_id).await;
            });
            Resolution::Approved { mark_used }
        }
        Decision::Reject { reason } => {
            warn!(
                "code rejected: group={} user={} code={:?} reason={}",
                ev.group_id, ev.user_id, code, reason
            );
            if let Err(e) = host
                .set_group_add_request(&ev.flag, false, Some(&reason))
                .await
            {
                warn!(
                    "reject call failed: group={} user={} err={}",
                    ev.group_id, ev.user_id, e
                );
            }
            Resolution::Rejected { reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::REASON_CODE_INVALID;
    use crate::testutil::{FakeAuthority, FakeHost};

    fn join_event(comment: &str) -> JoinRequestEvent {
        JoinRequestEvent {
            request_type: "group".into(),
            sub_type: "add".into(),
            group_id: 42,
            user_id: 10001,
            comment: comment.into(),
            flag: "flag-1".into(),
        }
    }

    #[test]
    fn decision_mapping() {
        assert_eq!(decide(&Validation::Valid), Decision::Approve);
        assert_eq!(
            decide(&Validation::AlreadyUsed),
            Decision::Reject {
                reason: REASON_CODE_USED.into()
            }
        );
        assert_eq!(
            decide(&Validation::Invalid {
                message: "invalid code".into()
            }),
            Decision::Reject {
                reason: "invalid code".into()
            }
        );
        assert_eq!(
            decide(&Validation::Unavailable),
            Decision::Reject {
                reason: REASON_SERVICE_DOWN.into()
            }
        );
    }

    #[tokio::test]
    async fn valid_code_approves_and_marks_used_once() {
        let host = FakeHost::new();
        let authority = Arc::new(FakeAuthority::with(Validation::Valid));
        let ev = join_event("apply ABCDEFG12345 please");

        let resolution = handle_join_request(&host, authority.clone(), &ev).await;
        let Resolution::Approved { mark_used } = resolution else {
            panic!("expected approval");
        };
        mark_used.await.unwrap();

        let resolutions = host.resolutions.lock().unwrap();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0], ("flag-1".to_string(), true, None));

        assert_eq!(
            authority.checks.lock().unwrap().as_slice(),
            &[(42, "ABCDEFG12345".to_string())]
        );
        assert_eq!(
            authority.marks.lock().unwrap().as_slice(),
            &[(42, "ABCDEFG12345".to_string(), 10001)]
        );
    }

    #[tokio::test]
    async fn missing_code_still_asks_the_service() {
        let host = FakeHost::new();
        let authority = Arc::new(FakeAuthority::with(Validation::Invalid {
            message: "invalid code".into(),
        }));
        let ev = join_event("no code here");

        let resolution = handle_join_request(&host, authority.clone(), &ev).await;
        assert!(matches!(
            resolution,
            Resolution::Rejected { ref reason } if reason == "invalid code"
        ));

        // The service was consulted with the empty key rather than
        // short-circuited locally.
        assert_eq!(
            authority.checks.lock().unwrap().as_slice(),
            &[(42, String::new())]
        );
        let resolutions = host.resolutions.lock().unwrap();
        assert_eq!(
            resolutions.as_slice(),
            &[(
                "flag-1".to_string(),
                false,
                Some("invalid code".to_string())
            )]
        );
        assert!(authority.marks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_used_gets_distinct_reason() {
        let host = FakeHost::new();
        let authority = Arc::new(FakeAuthority::with(Validation::AlreadyUsed));
        let ev = join_event("ABCDEFG12345");

        let resolution = handle_join_request(&host, authority, &ev).await;
        assert!(matches!(
            resolution,
            Resolution::Rejected { ref reason } if reason == REASON_CODE_USED
        ));
        assert_ne!(REASON_CODE_USED, REASON_CODE_INVALID);
    }

    #[tokio::test]
    async fn outage_rejects_with_retry_later_wording() {
        let host = FakeHost::new();
        let authority = Arc::new(FakeAuthority::with(Validation::Unavailable));
        let ev = join_event("ABCDEFG12345");

        let resolution = handle_join_request(&host, authority, &ev).await;
        assert!(matches!(
            resolution,
            Resolution::Rejected { ref reason } if reason == REASON_SERVICE_DOWN
        ));
        // The request was still resolved on the platform side.
        assert_eq!(host.resolutions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_add_requests_are_ignored() {
        let host = FakeHost::new();
        let authority = Arc::new(FakeAuthority::with(Validation::Valid));
        let mut ev = join_event("ABCDEFG12345");
        ev.sub_type = "invite".into();

        let resolution = handle_join_request(&host, authority.clone(), &ev).await;
        assert!(matches!(resolution, Resolution::Ignored));
        assert!(host.resolutions.lock().unwrap().is_empty());
        assert!(authority.checks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_survives_platform_failure() {
        let host = FakeHost::new();
        host.fail_resolutions();
        let authority = Arc::new(FakeAuthority::with(Validation::Valid));
        let ev = join_event("ABCDEFG12345");

        // set_group_add_request errors are absorbed; mark-used still runs.
        let resolution = handle_join_request(&host, authority.clone(), &ev).await;
        let Resolution::Approved { mark_used } = resolution else {
            panic!("expected approval");
        };
        mark_used.await.unwrap();
        assert_eq!(authority.marks.lock().unwrap().len(), 1);
    }
}
