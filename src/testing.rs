//! Test doubles shared by unit and integration tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::db::{init_database, Repository};
use crate::delivery::{Delivery, DeliveryError, DeliveryReceipt, OutboundMessage};
use crate::matcher::{Candidate, Shuffler};
use crate::models::{Member, UpsertGroupRequest, UpsertMemberRequest};

/// Shuffler that keeps membership order, making runs deterministic.
pub struct KeepOrder;

impl Shuffler for KeepOrder {
    fn shuffle(&self, _members: &mut [Candidate]) {}
}

/// Delivery that records what it sends and fails for chosen addresses.
#[derive(Default)]
pub struct FakeDelivery {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl FakeDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send sleeps this long before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn recover(&self, address: &str) {
        self.failing.lock().unwrap().remove(address);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&message.to) {
            return Err(DeliveryError::new(format!("provider rejected {}", message.to)));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(DeliveryReceipt {
            message_id: format!("msg-{}", sent.len()),
        })
    }
}

/// Repository over a throwaway SQLite file.
pub struct TestDb {
    pub repo: Arc<Repository>,
    _temp_dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        Self {
            repo: Arc::new(Repository::new(pool)),
            _temp_dir: temp_dir,
        }
    }

    /// Create members named by first name; phone is `555000<index>`,
    /// email `<first>@example.com`.
    pub async fn members(&self, first_names: &[&str]) -> Vec<Member> {
        let requests: Vec<UpsertMemberRequest> = first_names
            .iter()
            .enumerate()
            .map(|(i, first)| UpsertMemberRequest {
                id: None,
                first_name: Some(first.to_string()),
                last_name: Some("Tester".to_string()),
                phone_number: Some(format!("555000{}", i)),
                email: Some(format!("{}@example.com", first.to_lowercase())),
            })
            .collect();

        self.repo
            .upsert_members(&requests)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.member.unwrap())
            .collect()
    }

    pub async fn group(&self, name: &str, members: &[Member]) -> String {
        self.repo
            .upsert_group(&UpsertGroupRequest {
                id: None,
                name: Some(name.to_string()),
                year: Some("2025".to_string()),
                member_ids: members.iter().map(|m| m.id.clone()).collect(),
            })
            .await
            .unwrap()
            .group
            .id
    }
}
