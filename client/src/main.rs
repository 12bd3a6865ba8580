use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use onchess_client::HttpLedger;
use onchess_ledger::ledger::api::ListQuery;
use onchess_ledger::{
    accept_rematch, challenge_link, codec, parse_challenge, Amount, Identity, RematchOffer,
    Session, SessionId, SyncAgent, SyncConfig, Transition,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "onchess", version, about = "Play chess on an OnChess session ledger")]
struct Cli {
    /// Ledger server address
    #[arg(long, env = "ONCHESS_URL", default_value = "http://localhost:8080")]
    url: String,
    /// Identity to act as
    #[arg(long, env = "ONCHESS_IDENTITY")]
    identity: Option<String>,
    /// Poll interval used when the live feed is unavailable
    #[arg(long, env = "ONCHESS_POLL_MS", default_value_t = 2000)]
    poll_ms: u64,
    /// Base of the challenge links handed to opponents
    #[arg(long, env = "ONCHESS_LINK_BASE", default_value = "https://onchess.app/play")]
    link_base: String,
    #[command(subcommand)]
    command: Commands,
}

/// GAME arguments accept a join code or a challenge link
#[derive(Subcommand)]
enum Commands {
    /// Open a new game and print its join code
    Create,
    /// Take the second seat of a game
    Join { game: String },
    /// Submit a move; the fee defaults to the ledger's current rate
    Move {
        game: String,
        from: String,
        to: String,
        /// Position after the move, as produced by your move checker
        position: String,
        #[arg(long)]
        fee: Option<Amount>,
    },
    Resign { game: String },
    Show { game: String },
    List {
        /// all, open, active or ended
        #[arg(long, default_value = "all")]
        filter: String,
        #[arg(long)]
        player: Option<String>,
    },
    Leaderboard,
    /// Follow a game until it ends
    Watch { game: String },
    Rematch {
        #[command(subcommand)]
        command: RematchCommand,
    },
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
    Fees,
    Status,
    /// Play a scripted Scholar's Mate between two identities
    Demo {
        #[arg(long, default_value = "demo-white")]
        white: String,
        #[arg(long, default_value = "demo-black")]
        black: String,
    },
}

#[derive(Subcommand)]
enum RematchCommand {
    /// Create a fresh game and wait for the opponent to join it
    Offer,
    /// Join the game an opponent offered
    Accept { challenge: String },
}

#[derive(Subcommand)]
enum AdminCommand {
    /// End a game with no winner
    Terminate { game: String },
    /// End a game naming the winner
    Award { game: String, winner: String },
    SetRate { rate: Amount },
    Withdraw,
}

// Scholar's Mate, as (mover is white, from, to, position after the move)
const SCHOLARS_MATE: [(bool, &str, &str, &str); 7] = [
    (true, "e2", "e4", "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1"),
    (false, "e7", "e5", "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2"),
    (true, "f1", "c4", "rnbqkbnr/pppp1ppp/8/4p3/2B1P3/8/PPPP1PPP/RNBQK1NR b KQkq - 1 2"),
    (false, "b8", "c6", "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/8/PPPP1PPP/RNBQK1NR w KQkq - 2 3"),
    (true, "d1", "h5", "r1bqkbnr/pppp1ppp/2n5/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 3 3"),
    (false, "g8", "f6", "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4"),
    (true, "h5", "f7", "r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 4"),
];

impl Cli {
    fn me(&self) -> Result<Identity> {
        let raw = self
            .identity
            .as_deref()
            .ok_or_else(|| anyhow!("no identity: pass --identity or set ONCHESS_IDENTITY"))?;
        Identity::parse(raw).context("invalid identity")
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig::default().with_poll_interval(Duration::from_millis(self.poll_ms.max(50)))
    }
}

fn game_id(game: &str) -> Result<SessionId> {
    parse_challenge(game).with_context(|| format!("'{game}' is not a join code or challenge link"))
}

fn print_session(session: &Session) {
    let code = codec::encode(session.id)
        .map(|c| c.to_string())
        .unwrap_or_else(|_| "-".to_string());
    let seat_b = session
        .player_b
        .as_ref()
        .map(Identity::to_string)
        .unwrap_or_else(|| "(waiting)".to_string());

    println!("game {} [{}]", session.id, code);
    println!("  white:    {}", session.player_a);
    println!("  black:    {}", seat_b);
    println!("  moves:    {}", session.move_count);
    println!("  to move:  {:?}", session.turn);
    println!("  position: {}", session.position);
    if session.active {
        println!("  status:   active");
    } else {
        let winner = session
            .winner
            .as_ref()
            .map(Identity::to_string)
            .unwrap_or_else(|| "none".to_string());
        println!("  status:   ended ({:?}), winner: {}", session.end_reason, winner);
    }
}

fn print_transition(transition: &Transition) {
    match transition {
        Transition::OpponentJoined { player_b, .. } => println!("opponent joined: {player_b}"),
        Transition::MoveObserved {
            move_count,
            last_move,
            ..
        } => match last_move {
            Some(m) => println!("move {move_count}: {} -> {}", m.from, m.to),
            None => println!("move {move_count}"),
        },
        Transition::GameEnded { winner, reason, .. } => match winner {
            Some(w) => println!("game over ({reason:?}), winner: {w}"),
            None => println!("game over ({reason:?}), no winner"),
        },
    }
}

async fn current_fee(ledger: &HttpLedger, fee: Option<Amount>) -> Result<Amount> {
    match fee {
        Some(fee) => Ok(fee),
        None => Ok(ledger.fees().await.context("failed to read the move fee")?.rate_per_move),
    }
}

async fn watch(ledger: Arc<HttpLedger>, session_id: SessionId, config: SyncConfig) -> Result<()> {
    let mut handle = SyncAgent::spawn(ledger, session_id, config);

    loop {
        tokio::select! {
            transition = handle.next_transition() => match transition {
                Some(transition) => print_transition(&transition),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!(session_id, "stopped watching");
                handle.cancel().await;
                return Ok(());
            }
        }
    }

    if let Some(session) = handle.session() {
        print_session(&session);
    }
    Ok(())
}

async fn demo(ledger: &HttpLedger, white: &str, black: &str) -> Result<()> {
    let white = Identity::parse(white).context("invalid --white identity")?;
    let black = Identity::parse(black).context("invalid --black identity")?;
    let fee = current_fee(ledger, None).await?;

    let created = ledger.create(&white).await.context("failed to create game")?;
    let session_id = created.id;
    println!("created game {session_id} for {white}");

    ledger
        .join(session_id, &black)
        .await
        .context("black failed to join")?;
    println!("{black} joined");

    for (n, (white_moves, from, to, position)) in SCHOLARS_MATE.iter().enumerate() {
        let mover = if *white_moves { &white } else { &black };
        ledger
            .submit_move(session_id, mover, from, to, position, fee)
            .await
            .with_context(|| format!("move {} ({from}-{to}) rejected", n + 1))?;
        println!("move {}: {mover} {from} -> {to}", n + 1);
    }

    // The ledger does not detect mate; the mated side concedes
    let session = ledger
        .resign(session_id, &black)
        .await
        .context("black failed to resign")?;
    print_session(&session);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let ledger = Arc::new(HttpLedger::new(&cli.url).context("failed to build HTTP client")?);
    debug!(url = %cli.url, "using ledger");

    match &cli.command {
        Commands::Create => {
            let me = cli.me()?;
            let created = ledger.create(&me).await.context("failed to create game")?;
            println!("game {}", created.id);
            match created.code {
                Some(code) => {
                    println!("code: {code}");
                    println!("link: {}", challenge_link(&cli.link_base, created.id)?);
                }
                None => println!("code: (id outside the join code range)"),
            }
        }

        Commands::Join { game } => {
            let session = ledger
                .join(game_id(game)?, &cli.me()?)
                .await
                .context("failed to join")?;
            print_session(&session);
        }

        Commands::Move {
            game,
            from,
            to,
            position,
            fee,
        } => {
            let fee = current_fee(&ledger, *fee).await?;
            let session = ledger
                .submit_move(game_id(game)?, &cli.me()?, from, to, position, fee)
                .await
                .context("move rejected")?;
            print_session(&session);
        }

        Commands::Resign { game } => {
            let session = ledger
                .resign(game_id(game)?, &cli.me()?)
                .await
                .context("failed to resign")?;
            print_session(&session);
        }

        Commands::Show { game } => {
            let session = ledger
                .get_session(game_id(game)?)
                .await
                .context("failed to load game")?;
            print_session(&session);
        }

        Commands::List { filter, player } => {
            let query = ListQuery {
                filter: Some(filter.clone()),
                player: player.clone(),
            };
            let listed = ledger.list(&query).await.context("failed to list games")?;
            for session in &listed.sessions {
                let state = if session.is_open() {
                    "open"
                } else if session.active {
                    "active"
                } else {
                    "ended"
                };
                println!(
                    "{:>6}  {:<8} {} vs {}",
                    session.id,
                    state,
                    session.player_a,
                    session
                        .player_b
                        .as_ref()
                        .map(Identity::to_string)
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            println!("{} game(s)", listed.count);
        }

        Commands::Leaderboard => {
            let board = ledger.leaderboard().await.context("failed to load leaderboard")?;
            for (rank, standing) in board.standings.iter().enumerate() {
                println!(
                    "{:>3}. {:<44} {:>4} wins / {:>4} games  {:>5.1}%",
                    rank + 1,
                    standing.identity,
                    standing.wins,
                    standing.games,
                    standing.win_rate()
                );
            }
        }

        Commands::Watch { game } => {
            watch(ledger.clone(), game_id(game)?, cli.sync_config()).await?;
        }

        Commands::Rematch { command } => match command {
            RematchCommand::Offer => {
                let offer = RematchOffer::create(ledger.clone(), &cli.me()?, cli.sync_config())
                    .await
                    .context("failed to open rematch")?;
                println!("rematch game {} code {}", offer.session_id(), offer.code());
                println!("link: {}", offer.link(&cli.link_base)?);
                println!("waiting for opponent...");

                let paired = offer.accepted().await.context("rematch was not accepted")?;
                println!("{} accepted, game {} is on", paired.opponent, paired.session.id);
                paired.handle.cancel().await;
            }
            RematchCommand::Accept { challenge } => {
                let paired =
                    accept_rematch(ledger.clone(), challenge, &cli.me()?, cli.sync_config())
                        .await
                        .context("failed to accept rematch")?;
                println!("joined game {} against {}", paired.session.id, paired.opponent);
                paired.handle.cancel().await;
            }
        },

        Commands::Admin { command } => {
            let me = cli.me()?;
            match command {
                AdminCommand::Terminate { game } => {
                    let session = ledger
                        .terminate(&me, game_id(game)?)
                        .await
                        .context("failed to terminate")?;
                    print_session(&session);
                }
                AdminCommand::Award { game, winner } => {
                    let winner = Identity::parse(winner).context("invalid winner identity")?;
                    let session = ledger
                        .award(&me, game_id(game)?, &winner)
                        .await
                        .context("failed to award")?;
                    print_session(&session);
                }
                AdminCommand::SetRate { rate } => {
                    let fees = ledger.set_rate(&me, *rate).await.context("failed to set rate")?;
                    println!("rate per move: {}", fees.rate_per_move);
                }
                AdminCommand::Withdraw => {
                    let amount = ledger.withdraw(&me).await.context("failed to withdraw")?;
                    println!("withdrew {amount}");
                }
            }
        }

        Commands::Fees => {
            let fees = ledger.fees().await.context("failed to read fees")?;
            println!("admin:         {}", fees.admin);
            println!("rate per move: {}", fees.rate_per_move);
            println!("accumulated:   {}", fees.accumulated);
        }

        Commands::Status => {
            let status = ledger.status().await.context("failed to read status")?;
            println!("sessions:  {}", status.session_count);
            println!("fee rate:  {}", status.rate_per_move);
            println!("self join: {:?}", status.self_join);
            println!("uptime:    {}s", status.uptime_secs);
        }

        Commands::Demo { white, black } => demo(&ledger, white, black).await?,
    }

    Ok(())
}
