use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hashchain_core::{constants::DEFAULT_DIFFICULTY, CancelToken, Chain};
use serde_json::{json, Value};
use std::io::Read;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hashchain-cli")]
#[command(about = "Mine and verify a proof-of-work hash chain")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct MiningArgs {
    /// Leading zero hex digits required of every mined block hash
    #[arg(long, env = "HASHCHAIN_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine two sample transfers and print the resulting chain
    Demo {
        #[command(flatten)]
        mining: MiningArgs,
    },
    /// Mine each payload into a new block, in order
    Mine {
        #[command(flatten)]
        mining: MiningArgs,
        /// Search nonces on every core
        #[arg(long)]
        parallel: bool,
        /// Print the whole chain as JSON instead of one line per block
        #[arg(long)]
        json: bool,
        /// Block payloads; anything that is not valid JSON is stored as a string.
        /// JSON integers must fit in 64 bits
        #[arg(required = true)]
        payloads: Vec<String>,
    },
    /// Read an exported chain from stdin and check its hashes and links
    Verify {
        /// Also check that every block meets the chain's difficulty
        #[arg(long)]
        work: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries blocks and chain documents.
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo { mining } => demo(mining.difficulty).await,
        Command::Mine {
            mining,
            parallel,
            json,
            payloads,
        } => {
            let payloads = payloads
                .iter()
                .map(|raw| parse_payload(raw))
                .collect::<Result<Vec<_>>>()?;
            let chain = mine(mining.difficulty, payloads, parallel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&chain)?);
            } else {
                print_chain(&chain);
            }
            Ok(())
        }
        Command::Verify { work } => verify(work),
    }
}

async fn demo(difficulty: usize) -> Result<()> {
    let transfers = vec![
        json!({"from": "alice", "to": "bob", "amount": 10}),
        json!({"from": "bob", "to": "carol", "amount": 3}),
    ];
    let chain = mine(difficulty, transfers, false).await?;
    print_chain(&chain);
    Ok(())
}

async fn mine(difficulty: usize, payloads: Vec<Value>, parallel: bool) -> Result<Chain> {
    let mut chain = Chain::with_difficulty(difficulty)?;
    let cancel = cancel_on_ctrl_c();

    for payload in payloads {
        info!(index = chain.last_block().index() + 1, difficulty, "mining block");
        if parallel {
            chain
                .add_block_parallel(payload, &cancel)
                .context("mining stopped")?;
        } else {
            chain
                .add_block_async(payload, cancel.clone())
                .await
                .context("mining stopped")?;
        }
    }
    Ok(chain)
}

fn verify(work: bool) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading chain from stdin")?;
    let chain: Chain = serde_json::from_str(&input).context("stdin is not an exported chain")?;

    chain.verify().context("chain is invalid")?;
    if work {
        chain
            .verify_work()
            .context("chain does not meet its difficulty")?;
    }

    println!(
        "valid ({} blocks, difficulty {})",
        chain.blocks().len(),
        chain.difficulty()
    );
    Ok(())
}

fn print_chain(chain: &Chain) {
    for block in chain.blocks() {
        println!("{block}");
    }
    println!("chain valid: {}", chain.is_valid());
}

fn parse_payload(raw: &str) -> Result<Value> {
    let Ok(value) = serde_json::from_str(raw) else {
        return Ok(Value::String(raw.to_string()));
    };
    // serde_json reads integers past 64 bits as lossy floats.
    if let Some(literal) = oversized_integer(raw) {
        bail!("integer {literal} in payload {raw:?} is outside the 64-bit range");
    }
    Ok(value)
}

/// First integer literal in a JSON document that fits neither `i64` nor `u64`.
fn oversized_integer(json: &str) -> Option<&str> {
    let bytes = json.as_bytes();
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        if b == b'-' || b.is_ascii_digit() {
            let start = i;
            i += 1;
            while i < bytes.len()
                && matches!(bytes[i], b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')
            {
                i += 1;
            }
            let literal = &json[start..i];
            let integral = !literal.contains(['.', 'e', 'E']);
            if integral && literal.parse::<i64>().is_err() && literal.parse::<u64>().is_err() {
                return Some(literal);
            }
            continue;
        }
        i += 1;
    }
    None
}

/// A token that trips on Ctrl-C, so a long search can be abandoned cleanly.
fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    token
}
