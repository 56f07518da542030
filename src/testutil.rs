//! Scripted fakes for the platform and licensing boundaries.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::license::{CodeAuthority, MemberSink, PushMember, Validation};
use crate::onebot::{
    GroupHost, GroupInfo, HostError, MemberListPage, MemberRecord, ReplyTarget,
};

pub fn member(user_id: i64, nickname: &str) -> MemberRecord {
    MemberRecord {
        user_id,
        nickname: nickname.to_string(),
        ..MemberRecord::default()
    }
}

/// Records every platform call and plays back scripted member-list pages.
pub struct FakeHost {
    /// (flag, approve, reason) per set_group_add_request call.
    pub resolutions: Mutex<Vec<(String, bool, Option<String>)>>,
    pub page_requests: Mutex<Vec<Option<String>>>,
    pages: Mutex<VecDeque<Result<MemberListPage, HostError>>>,
    pub groups: Mutex<Vec<GroupInfo>>,
    members_of: Mutex<HashSet<(i64, i64)>>,
    pub sent: Mutex<Vec<(ReplyTarget, String)>>,
    /// (target, file name, byte count) per upload.
    pub uploads: Mutex<Vec<(ReplyTarget, String, usize)>>,
    pub login: i64,
    fail_resolutions: Mutex<bool>,
}

impl FakeHost {
    pub fn new() -> FakeHost {
        FakeHost {
            resolutions: Mutex::new(Vec::new()),
            page_requests: Mutex::new(Vec::new()),
            pages: Mutex::new(VecDeque::new()),
            groups: Mutex::new(Vec::new()),
            members_of: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            login: 123456,
            fail_resolutions: Mutex::new(false),
        }
    }

    pub fn push_page(&self, page: Result<MemberListPage, HostError>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn add_group(&self, group_id: i64, group_name: &str) {
        self.groups.lock().unwrap().push(GroupInfo {
            group_id,
            group_name: group_name.to_string(),
        });
    }

    pub fn allow_member(&self, group_id: i64, user_id: i64) {
        self.members_of.lock().unwrap().insert((group_id, user_id));
    }

    pub fn fail_resolutions(&self) {
        *self.fail_resolutions.lock().unwrap() = true;
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl GroupHost for FakeHost {
    async fn set_group_add_request(
        &self,
        flag: &str,
        approve: bool,
        reason: Option<&str>,
    ) -> Result<(), HostError> {
        self.resolutions
            .lock()
            .unwrap()
            .push((flag.to_string(), approve, reason.map(str::to_string)));
        if *self.fail_resolutions.lock().unwrap() {
            return Err(HostError::Api {
                action: "set_group_add_request",
                retcode: 100,
            });
        }
        Ok(())
    }

    async fn get_group_member_page(
        &self,
        _group_id: i64,
        next_token: Option<&str>,
    ) -> Result<MemberListPage, HostError> {
        self.page_requests
            .lock()
            .unwrap()
            .push(next_token.map(str::to_string));
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MemberListPage::default()))
    }

    async fn get_group_member_info(&self, group_id: i64, user_id: i64) -> Result<(), HostError> {
        if self.members_of.lock().unwrap().contains(&(group_id, user_id)) {
            Ok(())
        } else {
            Err(HostError::Api {
                action: "get_group_member_info",
                retcode: 100,
            })
        }
    }

    async fn get_group_list(&self) -> Result<Vec<GroupInfo>, HostError> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn upload_file(
        &self,
        target: ReplyTarget,
        bytes: &[u8],
        name: &str,
    ) -> Result<(), HostError> {
        self.uploads
            .lock()
            .unwrap()
            .push((target, name.to_string(), bytes.len()));
        Ok(())
    }

    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<(), HostError> {
        self.sent.lock().unwrap().push((target, text.to_string()));
        Ok(())
    }

    async fn login_id(&self) -> Result<i64, HostError> {
        Ok(self.login)
    }
}

pub struct FakeAuthority {
    validation: Validation,
    pub checks: Mutex<Vec<(i64, String)>>,
    pub marks: Mutex<Vec<(i64, String, i64)>>,
}

impl FakeAuthority {
    pub fn with(validation: Validation) -> FakeAuthority {
        FakeAuthority {
            validation,
            checks: Mutex::new(Vec::new()),
            marks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CodeAuthority for FakeAuthority {
    async fn check(&self, group_id: i64, code: &str) -> Validation {
        self.checks
            .lock()
            .unwrap()
            .push((group_id, code.to_string()));
        self.validation.clone()
    }

    async fn mark_used(&self, group_id: i64, code: &str, used_by: i64) {
        self.marks
            .lock()
            .unwrap()
            .push((group_id, code.to_string(), used_by));
    }
}

/// Scripted ingestion endpoint: pops one result per push, default success.
pub struct FakeSink {
    results: Mutex<VecDeque<Result<(), String>>>,
    /// (bot_qq, member count) per push.
    pub pushes: Mutex<Vec<(i64, usize)>>,
}

impl FakeSink {
    pub fn new() -> FakeSink {
        FakeSink {
            results: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn push_result(&self, result: Result<(), String>) {
        self.results.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl MemberSink for FakeSink {
    async fn push_members(&self, bot_qq: i64, members: &[PushMember]) -> Result<(), String> {
        self.pushes.lock().unwrap().push((bot_qq, members.len()));
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
