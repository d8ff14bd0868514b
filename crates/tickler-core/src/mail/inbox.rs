use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, anyhow};
use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info};

use super::{MailConnector, MailSession, Uid};
use crate::config::MailConfig;

type ImapSession = ::imap::Session<TlsStream<TcpStream>>;

/// Socket timeout for every read and write. A poll runs on the event loop
/// thread, so a hung server must not block it forever.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct ImapConnector;

impl MailConnector for ImapConnector {
    #[tracing::instrument(skip(self, config), fields(host = %config.host, port = config.port))]
    fn connect(&self, config: &MailConfig) -> anyhow::Result<Box<dyn MailSession>> {
        info!("connecting to IMAP server");

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .with_context(|| format!("TCP connection to {}:{} failed", config.host, config.port))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let tls = TlsConnector::new().context("failed to build TLS connector")?;
        let stream = tls
            .connect(&config.host, tcp)
            .map_err(|err| anyhow!("TLS handshake with {} failed: {err}", config.host))?;

        let mut client = ::imap::Client::new(stream);
        client
            .read_greeting()
            .context("server did not send an IMAP greeting")?;

        debug!(user = %config.user, "logging in");
        let mut session = client
            .login(&config.user, &config.password)
            .map_err(|(err, _client)| anyhow!("login as {} failed: {err}", config.user))?;

        session
            .select(&config.mailbox)
            .with_context(|| format!("SELECT {} failed", config.mailbox))?;
        debug!(mailbox = %config.mailbox, "mailbox selected");

        Ok(Box::new(ImapMailbox { session }))
    }
}

struct ImapMailbox {
    session: ImapSession,
}

impl MailSession for ImapMailbox {
    fn search_unseen(&mut self, marker: &str) -> anyhow::Result<Vec<Uid>> {
        let query = format!("UNSEEN SUBJECT \"{marker}\"");
        let found = self
            .session
            .uid_search(&query)
            .with_context(|| format!("SEARCH {query} failed"))?;
        let mut uids: Vec<Uid> = found.into_iter().collect();
        uids.sort_unstable();
        debug!(count = uids.len(), "unseen task messages");
        Ok(uids)
    }

    fn fetch(&mut self, uid: Uid) -> anyhow::Result<Vec<u8>> {
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .with_context(|| format!("FETCH of message {uid} failed"))?;
        let body = fetches
            .iter()
            .find_map(|fetch| fetch.body())
            .ok_or_else(|| anyhow!("server returned no body for message {uid}"))?;
        Ok(body.to_vec())
    }

    fn mark_read(&mut self, uid: Uid) -> anyhow::Result<()> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .with_context(|| format!("failed to mark message {uid} read"))?;
        Ok(())
    }

    fn logout(&mut self) -> anyhow::Result<()> {
        self.session.logout().context("LOGOUT failed")?;
        Ok(())
    }
}
