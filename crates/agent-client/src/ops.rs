use agent_protocol::command::{escape_client_message, escape_param};
use agent_protocol::decode::{decode_backup_dirs, decode_log_entries, decode_log_lines};
use agent_protocol::{
    BackupDir, BackupKind, Command, LogEntry, LogLine, RestoreAck, Sentinel, StartOutcome,
    StatusDetails,
};
use bytes::Bytes;
use tracing::warn;

use crate::client::CommandClient;
use crate::credentials::CredentialProvider;
use crate::transport::{Connection, Connector};

impl<C, P> CommandClient<C, P>
where
    C: Connector,
    P: CredentialProvider,
{
    async fn request(&self, command: &Command) -> Option<Bytes> {
        self.send(command).await.ok()
    }

    async fn request_ok(&self, command: &Command) -> bool {
        let Some(reply) = self.request(command).await else {
            return false;
        };
        match Sentinel::decode(&reply) {
            Sentinel::Ok => true,
            other => {
                warn!(
                    event = "command.rejected",
                    verb = command.verb(),
                    reply = ?other,
                    "agent rejected command"
                );
                false
            }
        }
    }

    async fn request_start(&self, command: Command) -> StartOutcome {
        match self.request(&command).await {
            Some(reply) => StartOutcome::from(Sentinel::decode(&reply)),
            None => StartOutcome::Failed,
        }
    }

    /// Configured backup directories, without those owned by virtual clients.
    /// An empty list means "unavailable" when [`CommandClient::has_error`] is set.
    pub async fn get_backup_dirs(&self) -> Vec<BackupDir> {
        let Some(reply) = self.request(&Command::new("GET BACKUP DIRS")).await else {
            return Vec::new();
        };
        if reply.is_empty() {
            self.session().latch_error();
            return Vec::new();
        }
        decode_backup_dirs(&reply).unwrap_or_else(|err| {
            warn!(event = "decode.backup_dirs", error = %err);
            Vec::new()
        })
    }

    pub async fn save_backup_dirs(&self, dirs: &[BackupDir]) -> bool {
        let mut command = Command::new("SAVE BACKUP DIRS").change_credential();
        for (index, dir) in dirs.iter().enumerate() {
            let mut name = escape_param(&dir.name);
            if !dir.name.contains('/') && !dir.flags.is_empty() {
                name.push('/');
                name.push_str(&escape_param(&dir.flags));
            }
            command = command
                .arg(format!("dir_{index}"), &dir.path)
                .raw_arg(format!("dir_{index}_name"), name)
                .raw_arg(format!("dir_{index}_group"), dir.group.to_string());
        }
        self.request_ok(&command).await
    }

    pub async fn start_backup(&self, kind: BackupKind) -> StartOutcome {
        let command = Command::new(format!("START BACKUP {}", kind.as_wire()));
        self.request_start(command).await
    }

    pub async fn start_image(&self, kind: BackupKind) -> StartOutcome {
        let command = Command::new(format!("START IMAGE {}", kind.as_wire()));
        self.request_start(command).await
    }

    pub async fn update_settings(&self, data: &str) -> bool {
        let verb = format!("UPDATE SETTINGS {}", escape_client_message(data));
        self.request_ok(&Command::new(verb).change_credential()).await
    }

    pub async fn get_log_entries(&self) -> Vec<LogEntry> {
        let command = Command::new("GET LOGPOINTS").change_credential();
        match self.request(&command).await {
            Some(reply) => decode_log_entries(&reply),
            None => Vec::new(),
        }
    }

    pub async fn get_log_data(&self, log_id: i32, log_level: i32) -> Vec<LogLine> {
        let command = Command::new("GET LOGDATA")
            .arg("logid", log_id.to_string())
            .arg("loglevel", log_level.to_string())
            .change_credential();
        match self.request(&command).await {
            Some(reply) => decode_log_lines(&reply),
            None => Vec::new(),
        }
    }

    pub async fn set_pause(&self, pause: bool) -> bool {
        self.request_ok(&Command::new(format!("PAUSE {pause}"))).await
    }

    pub async fn add_new_server(&self, ident: &str) -> bool {
        let command = Command::new("NEW SERVER")
            .raw_arg("ident", ident)
            .change_credential();
        self.request_ok(&command).await
    }

    pub async fn get_status_details(&self) -> StatusDetails {
        match self.request(&Command::new("STATUS DETAIL")).await {
            Some(reply) => decode_status_details(&reply),
            None => StatusDetails::default(),
        }
    }

    /// Same as [`CommandClient::get_status_details`], but keeps the connection in
    /// `slot` open for the next call.
    pub async fn get_status_details_on(
        &self,
        slot: &mut Option<Connection<C::Transport>>,
    ) -> StatusDetails {
        match self.send_on(&Command::new("STATUS DETAIL"), slot).await {
            Ok(reply) => decode_status_details(&reply),
            Err(_) => StatusDetails::default(),
        }
    }

    /// Raw reply of `GET ACCESS PARAMETERS`, empty when unavailable.
    pub async fn get_access_parameters(&self, tokens: &str) -> String {
        let command = Command::new("GET ACCESS PARAMETERS").raw_arg("tokens", tokens);
        self.request(&command)
            .await
            .map(|reply| String::from_utf8_lossy(&reply).into_owned())
            .unwrap_or_default()
    }

    pub async fn get_capabilities(&self) -> i32 {
        let details = self.get_status_details().await;
        if details.ok {
            details.capability_bits
        } else {
            0
        }
    }

    pub async fn restore_ok(&self, ok: bool) -> RestoreAck {
        let command = Command::new("RESTORE OK").arg("ok", ok.to_string());
        match self.request(&command).await {
            Some(reply) => RestoreAck::try_decode(&reply).unwrap_or_else(|err| {
                warn!(event = "decode.restore_ack", error = %err);
                RestoreAck::default()
            }),
            None => RestoreAck::default(),
        }
    }
}

fn decode_status_details(reply: &[u8]) -> StatusDetails {
    StatusDetails::try_decode(reply).unwrap_or_else(|err| {
        warn!(event = "decode.status_details", error = %err);
        StatusDetails::default()
    })
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{spawn_agent, test_client, Step};
    use agent_protocol::{BackupDir, BackupKind, StartOutcome};

    #[tokio::test]
    async fn start_backup_maps_sentinels() {
        let agent = spawn_agent(|request| {
            let reply = if request.starts_with("START BACKUP FULL") {
                "RUNNING"
            } else if request.starts_with("START BACKUP INCR") {
                "NO SERVER"
            } else if request.starts_with("START IMAGE FULL") {
                "OK"
            } else {
                "ERROR"
            };
            vec![Step::frame(reply)]
        })
        .await;
        let client = test_client(&agent.addr);

        assert_eq!(
            client.start_backup(BackupKind::Full).await,
            StartOutcome::AlreadyRunning
        );
        assert_eq!(
            client.start_backup(BackupKind::Incremental).await,
            StartOutcome::NoServer
        );
        assert_eq!(
            client.start_image(BackupKind::Full).await,
            StartOutcome::Started
        );
        assert_eq!(
            client.start_image(BackupKind::Incremental).await,
            StartOutcome::Failed
        );
    }

    #[tokio::test]
    async fn start_backup_fails_when_agent_is_down() {
        let addr = crate::test_utils::unused_addr().await;
        let client = test_client(&addr);
        assert_eq!(
            client.start_backup(BackupKind::Incremental).await,
            StartOutcome::Failed
        );
        assert!(client.has_error());
    }

    #[tokio::test]
    async fn backup_dirs_are_filtered() {
        let agent = spawn_agent(|_| {
            vec![Step::frame(
                r#"{"dirs":[{"path":"/home","name":"home","id":1,"group":0,"flags":""},{"path":"/vm","name":"vm","id":2,"group":0,"flags":"","virtual_client":"vm1"}]}"#,
            )]
        })
        .await;
        let client = test_client(&agent.addr);

        let dirs = client.get_backup_dirs().await;
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].path, "/home");
        assert!(!client.has_error());
    }

    #[tokio::test]
    async fn empty_backup_dirs_reply_latches_error() {
        let agent = spawn_agent(|_| vec![Step::frame("")]).await;
        let client = test_client(&agent.addr);

        assert!(client.get_backup_dirs().await.is_empty());
        assert!(client.has_error());
    }

    #[tokio::test]
    async fn save_backup_dirs_encodes_entries() {
        let agent = spawn_agent(|_| vec![Step::frame("OK")]).await;
        let client = test_client(&agent.addr);

        let dirs = vec![
            BackupDir {
                path: "/srv/data".to_string(),
                name: "data".to_string(),
                id: 1,
                group: 0,
                flags: "follow_symlinks".to_string(),
            },
            BackupDir {
                path: "C:\\Users".to_string(),
                name: "users/keep".to_string(),
                id: 2,
                group: 1,
                flags: "ignored".to_string(),
            },
        ];
        assert!(client.save_backup_dirs(&dirs).await);
        assert_eq!(
            agent.requests(),
            vec![
                "SAVE BACKUP DIRS#pw=change-secret\
                 &dir_0=%2Fsrv%2Fdata&dir_0_name=data/follow_symlinks&dir_0_group=0\
                 &dir_1=C%3A%5CUsers&dir_1_name=users%2Fkeep&dir_1_group=1"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn update_settings_escapes_data_into_verb() {
        let agent = spawn_agent(|_| vec![Step::frame("OK")]).await;
        let client = test_client(&agent.addr);

        assert!(client.update_settings("a=1\nb=2").await);
        assert_eq!(
            agent.requests(),
            vec!["UPDATE SETTINGS a=1\\nb=2#pw=change-secret".to_string()]
        );
    }

    #[tokio::test]
    async fn sentinel_commands_reject_other_replies() {
        let agent = spawn_agent(|_| vec![Step::frame("FAILED")]).await;
        let client = test_client(&agent.addr);

        assert!(!client.set_pause(true).await);
        assert!(!client.add_new_server("srv").await);
        assert_eq!(
            agent.requests(),
            vec![
                "PAUSE true#pw=secret".to_string(),
                "NEW SERVER#pw=change-secret&ident=srv".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn new_server_sends_ident_verbatim() {
        let agent = spawn_agent(|_| vec![Step::frame("OK")]).await;
        let client = test_client(&agent.addr);

        assert!(client.add_new_server("srv-1.example:55415/x").await);
        assert_eq!(
            agent.requests(),
            vec!["NEW SERVER#pw=change-secret&ident=srv-1.example:55415/x".to_string()]
        );
    }

    #[tokio::test]
    async fn log_commands_decode_lines() {
        let agent = spawn_agent(|request| {
            if request.starts_with("GET LOGPOINTS") {
                vec![Step::frame("4-2024-03-01 12:00\n5-2024-03-02 12:00\n")]
            } else {
                vec![Step::frame("1-started\n2-warning - slow disk")]
            }
        })
        .await;
        let client = test_client(&agent.addr);

        let entries = client.get_log_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].id, 5);

        let lines = client.get_log_data(5, 1).await;
        assert_eq!(lines[1].level, 2);
        assert_eq!(lines[1].message, "warning - slow disk");
        assert_eq!(
            agent.requests()[1],
            "GET LOGDATA#pw=change-secret&logid=5&loglevel=1"
        );
    }

    #[tokio::test]
    async fn capabilities_come_from_status_detail() {
        let agent = spawn_agent(|_| vec![Step::frame(r#"{"capability_bits":12}"#)]).await;
        let client = test_client(&agent.addr);
        assert_eq!(client.get_capabilities().await, 12);
    }

    #[tokio::test]
    async fn capabilities_default_to_zero_on_bad_json() {
        let agent = spawn_agent(|_| vec![Step::frame("oops")]).await;
        let client = test_client(&agent.addr);
        assert_eq!(client.get_capabilities().await, 0);
        assert!(!client.get_status_details().await.ok);
    }

    #[tokio::test]
    async fn restore_ok_reports_process() {
        let agent =
            spawn_agent(|_| vec![Step::frame(r#"{"ok":true,"accepted":true,"process_id":33}"#)])
                .await;
        let client = test_client(&agent.addr);

        let ack = client.restore_ok(true).await;
        assert!(ack.ok);
        assert!(ack.accepted);
        assert_eq!(ack.process_id, Some(33));
        assert_eq!(agent.requests(), vec!["RESTORE OK#pw=secret&ok=true".to_string()]);
    }

    #[tokio::test]
    async fn access_parameters_pass_through() {
        let agent = spawn_agent(|_| vec![Step::frame("server=a&token=b")]).await;
        let client = test_client(&agent.addr);

        assert_eq!(client.get_access_parameters("t1;t2").await, "server=a&token=b");
        assert_eq!(
            agent.requests(),
            vec!["GET ACCESS PARAMETERS#pw=secret&tokens=t1;t2".to_string()]
        );
    }
}
