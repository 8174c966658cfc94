//! `StateStore` as the scheduler's persistence and authentication backend.

use async_trait::async_trait;
use tracing::{debug, info};
use vision_core::{Credentials, Request, RequestStatus, RequestSummary};
use visiongrid_state::{RequestRecord, ResultRecord, StateStore, UserRecord};

use crate::collab::{Authenticator, Persistence};

#[async_trait]
impl Persistence for StateStore {
    async fn save_request(&self, request: &Request) -> anyhow::Result<()> {
        StateStore::save_request(self, &RequestRecord::from(request))?;
        Ok(())
    }

    async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        failure_reason: Option<String>,
    ) -> anyhow::Result<()> {
        StateStore::update_status(self, request_id, status, failure_reason)?;
        Ok(())
    }

    async fn save_result(
        &self,
        request_id: &str,
        owner_email: &str,
        descriptions: &[String],
    ) -> anyhow::Result<()> {
        let record = ResultRecord::new(
            request_id.to_string(),
            owner_email.to_string(),
            descriptions.to_vec(),
        );
        StateStore::save_result(self, &record)?;
        Ok(())
    }

    async fn get_result(&self, request_id: &str) -> anyhow::Result<Option<Vec<String>>> {
        Ok(StateStore::get_result(self, request_id)?.map(|r| r.descriptions))
    }

    async fn get_request(&self, request_id: &str) -> anyhow::Result<Option<Request>> {
        let Some(record) = StateStore::get_request(self, request_id)? else {
            return Ok(None);
        };
        let result = StateStore::get_result(self, request_id)?.map(|r| r.descriptions);
        Ok(Some(Request {
            id: record.id,
            status: record.status,
            owner_email: record.owner_email,
            specialization: record.specialization,
            image_ids: record.image_ids,
            result,
            failure_reason: record.failure_reason,
            created_at: record.created_at,
        }))
    }

    async fn delete_request(&self, request_id: &str) -> anyhow::Result<bool> {
        Ok(StateStore::delete_request(self, request_id)?)
    }

    async fn list_requests(&self, owner_email: &str) -> anyhow::Result<Vec<RequestSummary>> {
        Ok(StateStore::list_requests(self, owner_email)?
            .into_iter()
            .map(|r| RequestSummary {
                request_id: r.id,
                status: r.status,
                created_at: r.created_at,
            })
            .collect())
    }
}

/// Checks credentials against the users table. Unknown e-mails are
/// registered on first use.
#[derive(Clone)]
pub struct StoreAuthenticator {
    store: StateStore,
}

impl StoreAuthenticator {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Authenticator for StoreAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> anyhow::Result<bool> {
        let Credentials {
            username,
            email,
            password,
        } = credentials;
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Ok(false);
        }

        match self.store.get_user(email)? {
            Some(user) => {
                let ok = user.verify(username, password);
                debug!(%email, ok, "user authenticated");
                Ok(ok)
            }
            None => {
                self.store
                    .put_user(&UserRecord::new(username, email, password))?;
                info!(%email, %username, "user registered");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_core::{ActionType, Specialization};

    fn creds(username: &str, email: &str, password: &str) -> Credentials {
        Credentials {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn first_login_registers_then_verifies() {
        let auth = StoreAuthenticator::new(StateStore::open_in_memory().unwrap());
        assert!(auth.authenticate(&creds("ana", "ana@x", "pw")).await.unwrap());
        assert!(auth.authenticate(&creds("ana", "ana@x", "pw")).await.unwrap());
        assert!(!auth.authenticate(&creds("ana", "ana@x", "wrong")).await.unwrap());
        assert!(!auth.authenticate(&creds("eve", "ana@x", "pw")).await.unwrap());
    }

    #[tokio::test]
    async fn empty_fields_rejected() {
        let auth = StoreAuthenticator::new(StateStore::open_in_memory().unwrap());
        assert!(!auth.authenticate(&creds("", "a@x", "pw")).await.unwrap());
        assert!(!auth.authenticate(&creds("a", " ", "pw")).await.unwrap());
        assert!(!auth.authenticate(&creds("a", "a@x", "")).await.unwrap());
    }

    #[tokio::test]
    async fn stored_request_carries_result() {
        let store = StateStore::open_in_memory().unwrap();
        let p: &dyn Persistence = &store;
        let req = Request::pending(
            "r1".into(),
            "a@x",
            Specialization::new("yolov8", ActionType::Detect),
            vec!["img-0".into()],
        );
        p.save_request(&req).await.unwrap();
        p.update_status("r1", RequestStatus::Completed, None)
            .await
            .unwrap();
        p.save_result("r1", "a@x", &["cat detected".to_string()])
            .await
            .unwrap();

        let got = p.get_request("r1").await.unwrap().unwrap();
        assert_eq!(got.status, RequestStatus::Completed);
        assert_eq!(got.result, Some(vec!["cat detected".to_string()]));
        assert_eq!(p.list_requests("a@x").await.unwrap().len(), 1);
        assert!(p.delete_request("r1").await.unwrap());
        assert!(p.get_request("r1").await.unwrap().is_none());
    }
}
