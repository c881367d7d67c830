//! A minimal in-process SMTP server: enough of RFC 5321 for an
//! authenticating client, no TLS. It records every command verb, every
//! `AUTH PLAIN` identity, every `RCPT TO` attempt and every accepted message.
//! It can be told to refuse chosen recipients, or to advertise `STARTTLS`
//! and then refuse the upgrade.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct ReceivedEmail {
    pub from: String,
    pub to: Vec<String>,
    pub data: String,
}

impl ReceivedEmail {
    /// Everything after the header block.
    pub fn body(&self) -> &str {
        self.data
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .unwrap_or_default()
    }

    pub fn has_header(&self, header: &str) -> bool {
        self.data.lines().any(|line| line == header)
    }
}

#[derive(Default)]
struct Outbox {
    commands: Vec<String>,
    credentials: Vec<(String, String)>,
    recipient_attempts: Vec<String>,
    received: Vec<ReceivedEmail>,
    rejected: HashSet<String>,
    refuse_starttls: bool,
}

#[derive(Clone)]
pub struct FakeSmtpServer {
    port: u16,
    outbox: Arc<Mutex<Outbox>>,
}

impl FakeSmtpServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind the fake SMTP server");
        let port = listener.local_addr().unwrap().port();
        let outbox = Arc::new(Mutex::new(Outbox::default()));

        let sessions_outbox = outbox.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_session(stream, sessions_outbox.clone()));
            }
        });

        Self { port, outbox }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Answer `RCPT TO:<address>` with a permanent failure from now on.
    pub fn reject_recipient(&self, address: &str) {
        self.outbox
            .lock()
            .unwrap()
            .rejected
            .insert(address.to_string());
    }

    /// Advertise `STARTTLS` in the `EHLO` reply and answer it with `454`.
    pub fn refuse_starttls(&self) {
        self.outbox.lock().unwrap().refuse_starttls = true;
    }

    /// Upper-cased command verbs in arrival order, across all sessions.
    pub fn commands(&self) -> Vec<String> {
        self.outbox.lock().unwrap().commands.clone()
    }

    /// `(username, password)` from every `AUTH PLAIN` initial response.
    pub fn credentials(&self) -> Vec<(String, String)> {
        self.outbox.lock().unwrap().credentials.clone()
    }

    /// Every `RCPT TO` address seen, accepted or not, in arrival order.
    pub fn recipient_attempts(&self) -> Vec<String> {
        self.outbox.lock().unwrap().recipient_attempts.clone()
    }

    pub fn received_emails(&self) -> Vec<ReceivedEmail> {
        self.outbox.lock().unwrap().received.clone()
    }
}

async fn handle_session(stream: TcpStream, outbox: Arc<Mutex<Outbox>>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    writer.write_all(b"220 fake.smtp ESMTP ready\r\n").await?;

    let mut from = String::new();
    let mut to = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let refuse_starttls = {
            let mut state = outbox.lock().unwrap();
            state.commands.push(verb.clone());
            state.refuse_starttls
        };

        let reply = match verb.as_str() {
            "EHLO" if refuse_starttls => {
                "250-fake.smtp\r\n250-STARTTLS\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n"
            }
            "EHLO" => "250-fake.smtp\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n",
            "HELO" => "250 fake.smtp\r\n",
            "STARTTLS" if refuse_starttls => "454 4.7.0 TLS not available\r\n",
            "AUTH" => {
                if let Some(identity) = plain_identity(command) {
                    outbox.lock().unwrap().credentials.push(identity);
                }
                "235 2.7.0 Authentication successful\r\n"
            }
            "MAIL" => {
                from = address_in(command);
                to.clear();
                "250 2.1.0 Ok\r\n"
            }
            "RCPT" => {
                let address = address_in(command);
                let mut state = outbox.lock().unwrap();
                state.recipient_attempts.push(address.clone());
                if state.rejected.contains(&address) {
                    "550 5.1.1 Mailbox unavailable\r\n"
                } else {
                    to.push(address);
                    "250 2.1.5 Ok\r\n"
                }
            }
            "DATA" => {
                writer
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                let data = read_data(&mut reader).await?;
                outbox.lock().unwrap().received.push(ReceivedEmail {
                    from: from.clone(),
                    to: std::mem::take(&mut to),
                    data,
                });
                "250 2.0.0 Ok: queued\r\n"
            }
            "RSET" | "NOOP" => "250 2.0.0 Ok\r\n",
            "QUIT" => {
                writer.write_all(b"221 2.0.0 Bye\r\n").await?;
                return Ok(());
            }
            _ => "502 5.5.2 Command not recognized\r\n",
        };
        writer.write_all(reply.as_bytes()).await?;
    }
}

/// Read the message up to the lone `.` line, undoing dot-stuffing.
async fn read_data(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let content = line.trim_end_matches(['\r', '\n']);
        if content == "." {
            break;
        }
        lines.push(content.strip_prefix('.').unwrap_or(content).to_string());
    }
    Ok(lines.join("\r\n"))
}

fn address_in(command: &str) -> String {
    command
        .split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map(|(address, _)| address.to_string())
        .unwrap_or_default()
}

/// Decode `AUTH PLAIN <base64(authzid \0 username \0 password)>`.
fn plain_identity(command: &str) -> Option<(String, String)> {
    let mut words = command.split_whitespace().skip(1);
    if !words.next()?.eq_ignore_ascii_case("PLAIN") {
        return None;
    }
    let decoded = base64::decode(words.next()?).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let mut parts = decoded.split('\0').skip(1);
    Some((parts.next()?.to_string(), parts.next()?.to_string()))
}
