use std::sync::Arc;

use chatstream_core::config::{ChatOptions, Config};
use chatstream_core::model::{Message, Role};
use chatstream_core::transport::HttpTransport;
use chatstream_core::{ChatController, CoreResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::task::JoinHandle;

type Exchange = JoinHandle<CoreResult<Option<String>>>;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let transport = HttpTransport::from_cfg(&cfg.endpoint, &cfg.http)?;
    let controller = ChatController::new(
        Arc::new(transport),
        ChatOptions {
            api: Some(cfg.endpoint.api.clone()),
            ..ChatOptions::default()
        },
    );
    tracing::info!(conversation = %controller.id(), api = %controller.api(), "chat session started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();
    eprintln!("commands: /reload /reset /quit");

    loop {
        out.write_all(b"> ").await?;
        out.flush().await?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        let (reply_at, exchange) = match line {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                controller.set_messages(Vec::new());
                continue;
            }
            "/reload" => {
                let current = controller.messages();
                let reply_at = match current.last() {
                    Some(m) if m.role == Role::Assistant => current.len() - 1,
                    _ => current.len(),
                };
                let c = controller.clone();
                (reply_at, tokio::spawn(async move { c.reload().await }))
            }
            text => {
                let reply_at = controller.messages().len() + 1;
                controller.handle_input_change(text);
                match controller.handle_submit() {
                    Some(handle) => (reply_at, handle),
                    None => continue,
                }
            }
        };
        follow(&controller, reply_at, exchange, &mut out).await?;
    }
    Ok(())
}

/// Print the reply as it grows until the exchange ends; Ctrl-C stops it.
async fn follow(
    controller: &ChatController,
    reply_at: usize,
    mut exchange: Exchange,
    out: &mut Stdout,
) -> anyhow::Result<()> {
    let mut rx = controller.subscribe();
    let mut printed = 0usize;
    let result = loop {
        tokio::select! {
            res = &mut exchange => break res?,
            changed = rx.changed() => {
                if changed.is_err() {
                    break (&mut exchange).await?;
                }
                let snapshot = rx.borrow_and_update().clone();
                render(&snapshot, reply_at, &mut printed, out).await?;
            }
            _ = tokio::signal::ctrl_c() => controller.stop(),
        }
    };
    render(&controller.messages(), reply_at, &mut printed, out).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;

    match result {
        Ok(Some(_)) => {}
        Ok(None) => eprintln!("[stopped]"),
        Err(e) => eprintln!("[error: {e}]"),
    }
    Ok(())
}

async fn render(
    snapshot: &[Message],
    reply_at: usize,
    printed: &mut usize,
    out: &mut Stdout,
) -> std::io::Result<()> {
    let Some(reply) = snapshot.get(reply_at).filter(|m| m.role == Role::Assistant) else {
        return Ok(());
    };
    if let Some(rest) = reply.content.get(*printed..)
        && !rest.is_empty()
    {
        out.write_all(rest.as_bytes()).await?;
        out.flush().await?;
        *printed = reply.content.len();
    }
    Ok(())
}
