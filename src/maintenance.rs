//! Operator-only bulk operations. Nothing here is reachable over HTTP.

use std::fmt;

use tracing::{info, warn};

use crate::db::Store;
use crate::jobs::repo_types::JobPurge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Users created through the identity provider, with everything they own.
    PurgeExternalUsers,
    PurgeAllUsers,
    PurgeJobs(JobPurge),
    PurgeMessages,
    /// Rewrites legacy expertise spellings to the canonical vocabulary.
    StandardizeExpertise,
}

impl Task {
    pub fn is_destructive(self) -> bool {
        !matches!(self, Task::StandardizeExpertise)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub task: Task,
    pub lines: Vec<String>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

pub async fn run(store: &dyn Store, task: Task) -> anyhow::Result<Report> {
    if task.is_destructive() {
        warn!(?task, "running destructive maintenance task");
    }
    let lines = match task {
        Task::PurgeExternalUsers => {
            let n = store.delete_external_users().await?;
            vec![format!("deleted {n} externally authenticated user(s)")]
        }
        Task::PurgeAllUsers => {
            let n = store.delete_all_users().await?;
            vec![format!("deleted {n} user(s) and all dependent records")]
        }
        Task::PurgeJobs(which) => {
            let n = store.delete_jobs(which).await?;
            let label = match which {
                JobPurge::All => "",
                JobPurge::Open => "open ",
                JobPurge::Finished => "finished ",
            };
            vec![format!("deleted {n} {label}job(s)")]
        }
        Task::PurgeMessages => {
            let n = store.delete_messages().await?;
            vec![format!("deleted {n} message(s)")]
        }
        Task::StandardizeExpertise => {
            let r = store.standardize_expertise().await?;
            vec![
                format!("updated expertise on {} seller(s)", r.sellers),
                format!("updated expertise on {} job(s)", r.jobs),
            ]
        }
    };
    for line in &lines {
        info!(?task, "{line}");
    }
    Ok(Report { task, lines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::jobs::repo_types::NewJob;
    use crate::messages::repo_types::NewMessage;
    use crate::users::repo_types::{NewUser, Role};

    fn new_user(name: &str, external: Option<&str>) -> NewUser {
        NewUser {
            username: name.into(),
            full_name: name.into(),
            email: format!("{name}@example.com"),
            password_hash: None,
            role: Role::Client,
            external_id: external.map(str::to_string),
            profile_image: None,
            profile_completed: true,
        }
    }

    #[tokio::test]
    async fn purges_report_counts() {
        let store = MemoryStore::new();
        let local = store.create_account(new_user("local", None)).await.unwrap();
        let ext = store.create_account(new_user("ext", Some("42"))).await.unwrap();
        store
            .insert_message(NewMessage {
                sender_id: local.id,
                receiver_id: ext.id,
                content: "hi".into(),
                job_id: None,
            })
            .await
            .unwrap();
        store
            .insert_job(NewJob {
                buyer_id: local.id,
                title: "t".into(),
                description: "d".into(),
                price: 1.0,
                expertise: vec![],
            })
            .await
            .unwrap();

        let r = run(&store, Task::PurgeExternalUsers).await.unwrap();
        assert_eq!(r.to_string(), "deleted 1 externally authenticated user(s)");
        assert!(store.find_user(local.id).await.unwrap().is_some());

        let r = run(&store, Task::PurgeJobs(JobPurge::Finished)).await.unwrap();
        assert_eq!(r.to_string(), "deleted 0 finished job(s)");
        let r = run(&store, Task::PurgeJobs(JobPurge::Open)).await.unwrap();
        assert_eq!(r.to_string(), "deleted 1 open job(s)");

        let r = run(&store, Task::PurgeAllUsers).await.unwrap();
        assert_eq!(r.to_string(), "deleted 1 user(s) and all dependent records");
        assert_eq!(
            run(&store, Task::PurgeMessages).await.unwrap().to_string(),
            "deleted 0 message(s)"
        );
    }

    #[tokio::test]
    async fn standardize_is_not_destructive() {
        assert!(!Task::StandardizeExpertise.is_destructive());
        assert!(Task::PurgeMessages.is_destructive());
        let r = run(&MemoryStore::new(), Task::StandardizeExpertise).await.unwrap();
        assert_eq!(r.lines.len(), 2);
    }
}
