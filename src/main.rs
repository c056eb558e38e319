use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bitcoin::Amount;
use clap::{Parser, ValueEnum};
use log::info;

use account_sync_engine::backend::{CoreError, SyncStatus};
use account_sync_engine::prelude::*;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scenario {
    /// Start, sync once, log out.
    Quiet,
    /// Bursts of balance updates, a sweep and block height changes.
    Busy,
    /// The server reports changed account and wallet data.
    Dirty,
    /// The server rejects our OTP state.
    Otp,
}

#[derive(Parser)]
#[command(author, version, about = "Drive the account engine against the in-memory core")]
struct Args {
    #[arg(long, default_value_t = 3)]
    wallets: usize,

    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// JSON engine configuration; defaults apply for missing keys.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    otp_secret: Option<String>,

    #[arg(long, value_enum, default_value_t = Scenario::Busy)]
    scenario: Scenario,
}

/// Prints every notification with the time since login.
struct Printer {
    t0: Instant,
}

impl Printer {
    fn print(&self, what: impl std::fmt::Display) {
        println!("[{:>6} ms] {what}", self.t0.elapsed().as_millis());
    }
}

impl AccountCallbacks for Printer {
    fn wallets_loading(&self) {
        self.print("wallets loading");
    }
    fn wallets_loaded(&self) {
        self.print("wallets loaded");
    }
    fn wallets_changed(&self) {
        self.print("wallet cache rebuilt");
    }
    fn wallet_changed(&self, wallet: &WalletId) {
        self.print(format_args!("wallet {wallet} changed"));
    }
    fn account_changed(&self) {
        self.print("account changed remotely");
    }
    fn remote_password_change(&self) {
        self.print("password changed on another device");
    }
    fn otp_skew(&self) {
        self.print("OTP rejected, check the clock");
    }
    fn otp_required(&self) {
        self.print("OTP required");
    }
    fn otp_reset_pending(&self) {
        self.print("OTP reset pending");
    }
    fn exchange_rate_changed(&self) {
        self.print("exchange rates updated");
    }
    fn block_height_changed(&self) {
        self.print("new block");
    }
    fn balance_update(&self, wallet: &WalletId, tx: &TxId) {
        self.print(format_args!("balance update {wallet} ({tx})"));
    }
    fn incoming_payment(&self, wallet: &WalletId, tx: &TxId) {
        self.print(format_args!("incoming payment {wallet} ({tx})"));
    }
    fn sweep_complete(&self, wallet: &WalletId, tx: Option<&TxId>, amount: Amount) {
        let tx = tx.map_or("-", TxId::as_str);
        self.print(format_args!("sweep into {wallet}: {amount} ({tx})"));
    }
    fn logged_out(&self) {
        self.print("logged out");
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    println!("[MAIN] Scenario: {:?}, {} wallet(s)", args.scenario, args.wallets);

    let core = Arc::new(MockWalletCore::new().with_wallets(args.wallets));
    let account = Account::new(core.clone(), "demo", Some("demo-password"), config)
        .context("login failed")?;
    account.set_otp_secret(args.otp_secret.clone());
    account.set_callbacks(Arc::new(Printer { t0: Instant::now() }));

    prepare(&core, args.scenario);
    account.start_background_tasks();

    let sink = account.event_sink();
    let ids = account.wallet_ids()?;
    if let (Scenario::Busy, Some(first)) = (args.scenario, ids.first()) {
        thread::sleep(Duration::from_millis(300));
        for id in &ids {
            sink.post(CoreEvent::WatcherSyncDone { wallet: id.clone() });
        }
        for n in 0..20 {
            sink.post(CoreEvent::BalanceUpdate {
                wallet: first.clone(),
                tx: TxId::new(format!("tx-{n}")),
            });
        }
        sink.post(CoreEvent::IncomingPayment {
            wallet: first.clone(),
            tx: TxId::new("tx-incoming"),
        });
        sink.post(CoreEvent::BlockHeightChanged);
        sink.post(CoreEvent::SweepComplete {
            wallet: first.clone(),
            tx: Some(TxId::new("tx-sweep")),
            amount: Amount::from_sat(25_000),
        });
    }

    thread::sleep(Duration::from_secs(args.seconds));

    if let Some(wallets) = account.wallets() {
        println!("-----------------------------------");
        for w in wallets.iter() {
            println!(
                "{:<12} {:<10} {:>16} {}",
                w.id.as_str(),
                w.currency.as_deref().unwrap_or("?"),
                w.balance.to_string(),
                if w.synced { "synced" } else { "pending" }
            );
        }
        println!("-----------------------------------");
    }
    info!("[MAIN] sync cycles: {}", account.engine().sync_cycles());

    account.logout();
    Ok(())
}

/// Script the core's answers for the chosen scenario.
fn prepare(core: &MockWalletCore, scenario: Scenario) {
    match scenario {
        Scenario::Quiet | Scenario::Busy => {}
        Scenario::Dirty => {
            core.push_account_sync(Ok(SyncStatus {
                dirty: true,
                password_changed: true,
            }));
            core.mark_wallet_dirty("wallet-1");
            core.set_otp_reset_pending(true);
        }
        Scenario::Otp => {
            core.push_account_sync(Err(CoreError::new(
                ResultCode::InvalidOtp,
                "two-factor check failed",
            )));
        }
    }
}
