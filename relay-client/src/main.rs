use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use relay_client::{
    Session,
    cli::{Cli, Command, ListenArgs, SendArgs},
    ids::join_ids,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut session = Session::connect(cli.server.as_str())
        .await
        .with_context(|| format!("could not reach hub at {}", cli.server))?;

    let outcome = match cli.command {
        Command::Whoami => whoami(&mut session).await,
        Command::Peers => peers(&mut session).await,
        Command::Send(args) => send(&mut session, args).await,
        Command::Listen(args) => listen(&mut session, args).await,
    };

    session.close().await;
    outcome
}

async fn whoami(session: &mut Session) -> Result<()> {
    let identity = session.identify().await.context("identity request failed")?;
    write_stdout(&format!("identity: {identity}")).await?;
    Ok(())
}

async fn peers(session: &mut Session) -> Result<()> {
    let peers = session.list_peers().await.context("list request failed")?;
    if peers.is_empty() {
        write_stdout("no other clients").await?;
    } else {
        write_stdout(&join_ids(&peers)).await?;
    }
    Ok(())
}

async fn send(session: &mut Session, args: SendArgs) -> Result<()> {
    let payload = match args.message {
        Some(message) => message.into_bytes(),
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("failed to read message from stdin")?;
            buf
        }
    };

    session
        .send_relay(&args.to, &payload)
        .await
        .context("relay failed")?;
    info!(recipients = %join_ids(&args.to), len = payload.len(), "message relayed");
    Ok(())
}

async fn listen(session: &mut Session, args: ListenArgs) -> Result<()> {
    let identity = session.identify().await.context("identity request failed")?;
    write_stdout(&format!("*** listening as {identity}")).await?;

    let (handle, mut inbox) = session.subscribe(args.capacity as usize)?;

    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(message) => {
                    let body = String::from_utf8_lossy(&message.payload);
                    write_stdout(&format!("<{}> {}", message.sender, body)).await?;
                }
                None => break,
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    session.close().await;
    let reason = handle.join().await;
    write_stdout(&format!("*** receive loop ended: {reason}")).await?;
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
