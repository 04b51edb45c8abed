use std::io::{self, BufRead, Write};

use anyhow::Result;
use deepchat_core::chat::{CompletionProps, Message, StreamObserver};
use providers::deepinfra::config::DeepinfraConfig;
use providers::deepinfra::DeepinfraClient;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Prints only the suffix each snapshot appends. Snapshots grow by whole
/// segments, so the recorded length always sits on a char boundary.
struct StdoutPrinter {
    printed: usize,
}

impl StreamObserver for StdoutPrinter {
    fn on_message(&mut self, message: &Message) {
        if message.content.len() > self.printed {
            print!("{}", &message.content[self.printed..]);
            let _ = io::stdout().flush();
            self.printed = message.content.len();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = DeepinfraConfig::from_env_and_file()?;
    let mut client = DeepinfraClient::new(cfg)?;
    if let Err(e) = client.init().await {
        warn!(target: "cli", "catalog fetch failed, using defaults only: {}", e);
    }
    info!(target: "cli", "ready, {} text-generation models", client.catalog().len());

    let mut history: Vec<Message> = Vec::new();
    let mut model: Option<String> = None;
    let stdin = io::stdin();

    println!("deepchat: /model <name>, /models, /quit");
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if let Some(rest) = text.strip_prefix('/') {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let cmd = parts.next().unwrap_or("");
            let arg = parts.next().unwrap_or("").trim();
            match cmd {
                "quit" | "exit" => break,
                "model" => {
                    model = (!arg.is_empty()).then(|| arg.to_string());
                    println!("[info] model set to '{}'", model.as_deref().unwrap_or("default"));
                }
                "models" => {
                    for name in client.catalog().model_names() {
                        println!("{name}");
                    }
                }
                _ => println!("[info] unknown command '/{cmd}'"),
            }
            continue;
        }

        history.push(Message::user(text));
        let props = CompletionProps::from_messages(model.as_deref(), &history);
        let mut printer = StdoutPrinter { printed: 0 };
        let envelope = client.completion_stream(&props, &mut printer).await;
        println!();
        match envelope.data.result {
            Some(reply) if envelope.is_success() => history.push(reply),
            _ => {
                // keep history consistent so a retry resends the same turn
                history.pop();
                println!("[error] {}", envelope.data.message.unwrap_or_default());
            }
        }
    }
    Ok(())
}
