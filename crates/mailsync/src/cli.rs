use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mailsync", version, about = "Mirror IMAP mailboxes into SQLite")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Synchronize one account, or every account with --all.
    Sync(SyncCmd),
    Folders(FoldersCmd),
    Messages(MessagesCmd),
    Message(MessageCmd),
    Send(SendCmd),
    Attachment(AttachmentCmd),
    /// Delete mirrored folders, messages and attachments.
    Reset(ResetCmd),
    /// Queue a sync of every account on the worker and wait for it.
    Trigger(TriggerCmd),
    /// Run the worker, triggering a sync on a fixed interval.
    Worker(WorkerCmd),
}

#[derive(Args, Debug)]
pub(crate) struct SyncCmd {
    #[arg(long)]
    pub(crate) account: Option<String>,
    #[arg(long, conflicts_with = "account")]
    pub(crate) all: bool,
    #[arg(long = "folders-only")]
    pub(crate) folders_only: bool,
}

#[derive(Args, Debug)]
pub(crate) struct FoldersCmd {
    #[command(subcommand)]
    pub(crate) command: FoldersCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FoldersCommand {
    List(FoldersList),
}

#[derive(Args, Debug)]
pub(crate) struct FoldersList {
    #[arg(long)]
    pub(crate) account: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct MessagesCmd {
    #[command(subcommand)]
    pub(crate) command: MessagesCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum MessagesCommand {
    List(MessagesList),
}

#[derive(Args, Debug)]
pub(crate) struct MessagesList {
    /// Local folder id.
    #[arg(long)]
    pub(crate) folder: Option<i64>,
    #[arg(long, default_value_t = 50)]
    pub(crate) limit: i64,
}

#[derive(Args, Debug)]
pub(crate) struct MessageCmd {
    #[command(subcommand)]
    pub(crate) command: MessageCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum MessageCommand {
    Get(MessageGet),
    Move(MessageMove),
    Delete(MessageDelete),
    Reply(MessageReply),
}

#[derive(Args, Debug)]
pub(crate) struct MessageGet {
    #[arg(long)]
    pub(crate) id: i64,
}

#[derive(Args, Debug)]
pub(crate) struct MessageMove {
    #[arg(long)]
    pub(crate) account: Option<String>,
    #[arg(long)]
    pub(crate) id: i64,
    /// Local id of the target folder.
    #[arg(long)]
    pub(crate) folder: i64,
}

#[derive(Args, Debug)]
pub(crate) struct MessageDelete {
    #[arg(long)]
    pub(crate) account: Option<String>,
    #[arg(long)]
    pub(crate) id: i64,
}

#[derive(Args, Debug)]
pub(crate) struct MessageReply {
    #[arg(long)]
    pub(crate) account: Option<String>,
    #[arg(long)]
    pub(crate) id: i64,
    #[arg(long)]
    pub(crate) body: String,
    #[arg(long)]
    pub(crate) attach: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct SendCmd {
    #[arg(long)]
    pub(crate) account: Option<String>,
    #[arg(long)]
    pub(crate) to: String,
    #[arg(long)]
    pub(crate) subject: String,
    #[arg(long)]
    pub(crate) body: String,
    #[arg(long)]
    pub(crate) attach: Vec<String>,
    /// Mark the message as system-generated.
    #[arg(long)]
    pub(crate) system: bool,
}

#[derive(Args, Debug)]
pub(crate) struct AttachmentCmd {
    #[command(subcommand)]
    pub(crate) command: AttachmentCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AttachmentCommand {
    Download(AttachmentDownload),
}

#[derive(Args, Debug)]
pub(crate) struct AttachmentDownload {
    #[arg(long)]
    pub(crate) account: Option<String>,
    #[arg(long)]
    pub(crate) id: i64,
    #[arg(long)]
    pub(crate) path: String,
}

#[derive(Args, Debug)]
pub(crate) struct ResetCmd {
    /// Limit the reset to this account's tenant.
    #[arg(long)]
    pub(crate) account: Option<String>,
    #[arg(long)]
    pub(crate) yes: bool,
}

#[derive(Args, Debug)]
pub(crate) struct TriggerCmd {
    #[arg(long = "folders-only")]
    pub(crate) folders_only: bool,
}

#[derive(Args, Debug)]
pub(crate) struct WorkerCmd {
    #[arg(long = "interval-secs", default_value_t = 300)]
    pub(crate) interval_secs: u64,
    #[arg(long = "folders-only")]
    pub(crate) folders_only: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, CliCommand, MessageCommand};

    #[test]
    fn parses_sync_all_and_message_move() {
        let cli = Cli::try_parse_from(["mailsync", "sync", "--all", "--folders-only"])
            .expect("sync parses");
        match cli.command {
            CliCommand::Sync(args) => {
                assert!(args.all);
                assert!(args.folders_only);
                assert!(args.account.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["mailsync", "message", "move", "--id", "4", "--folder", "9"])
            .expect("move parses");
        match cli.command {
            CliCommand::Message(cmd) => match cmd.command {
                MessageCommand::Move(args) => assert_eq!((args.id, args.folder), (4, 9)),
                other => panic!("unexpected message command {:?}", other),
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn sync_rejects_account_with_all() {
        assert!(Cli::try_parse_from(["mailsync", "sync", "--all", "--account", "x"]).is_err());
    }
}
