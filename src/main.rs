//! equisight: watchlist equity analysis service.
//!
//! Runs as a one-shot batch job, a daily scheduled service, or a
//! long-lived API server, fusing multi-source market data with LLM
//! commentary and fanning reports out to the configured channels.

use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;

use equisight::application::market_review::run_market_review;
use equisight::application::pipeline::AnalysisPipeline;
use equisight::application::scheduler;
use equisight::application::task_service::TaskService;
use equisight::config::Config;
use equisight::domain::ports::{Analyzer, SearchService, Source};
use equisight::infrastructure::core::circuit_breaker::BreakerRegistry;
use equisight::infrastructure::core::http_client_factory::HttpClientFactory;
use equisight::infrastructure::core::rate_gate::RateGate;
use equisight::infrastructure::core::ttl_cache::SnapshotCache;
use equisight::infrastructure::llm::LlmAnalyzer;
use equisight::infrastructure::notify::NotificationService;
use equisight::infrastructure::persistence::Database;
use equisight::infrastructure::search::RotatingSearchService;
use equisight::infrastructure::sources::{
    FetcherManager, SourceContext, baostock::BaostockFetcher, eastmoney::EastmoneyFetcher,
    manager::ManagerConfig, sina::SinaFetcher, tencent::TencentFetcher, tushare::TushareFetcher,
    yahoo::YahooFetcher,
};
use equisight::interfaces::api::{self, ApiState};

#[derive(Parser, Debug)]
#[command(name = "equisight", about = "Watchlist equity analysis service")]
struct Args {
    /// Verbose debug logging
    #[arg(long)]
    debug: bool,

    /// Fetch data only, skip the AI analysis step
    #[arg(long)]
    dry_run: bool,

    /// Comma-separated ticker list overriding the configured watchlist
    #[arg(long)]
    stocks: Option<String>,

    /// Skip outbound notifications
    #[arg(long)]
    no_notify: bool,

    /// Push each stock's report as soon as it completes
    #[arg(long)]
    single_notify: bool,

    /// Worker pool size override
    #[arg(long)]
    workers: Option<usize>,

    /// Daily scheduled mode
    #[arg(long)]
    schedule: bool,

    /// Run only the market review
    #[arg(long)]
    market_review: bool,

    /// Skip the market review phase
    #[arg(long)]
    no_market_review: bool,

    /// Start the REST API alongside the analysis run
    #[arg(long)]
    serve: bool,

    /// Start only the REST API, no automatic analysis
    #[arg(long)]
    serve_only: bool,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Do not persist analysis context snapshots
    #[arg(long)]
    no_context_snapshot: bool,
}

/// File writer handing tracing output to the daily log file.
#[derive(Clone)]
struct LogFileFactory {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileFactory {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter {
            file: self.file.clone(),
        }
    }
}

struct LogFileWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self.file.lock().expect("log file lock poisoned");
        file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self.file.lock().expect("log file lock poisoned");
        file.flush()
    }
}

fn setup_logging(config: &Config, debug: bool) {
    let level = if debug || config.debug {
        Level::DEBUG
    } else {
        match config.log_level.to_uppercase().as_str() {
            "DEBUG" => Level::DEBUG,
            "WARN" | "WARNING" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let file_layer = std::fs::create_dir_all(&config.log_dir)
        .ok()
        .and_then(|_| {
            let path = std::path::Path::new(&config.log_dir).join(format!(
                "stock_analysis_{}.log",
                chrono::Local::now().format("%Y%m%d")
            ));
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        })
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_writer(LogFileFactory {
                    file: Arc::new(Mutex::new(file)),
                })
                .with_ansi(false)
                .with_target(false)
        });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

struct App {
    config: Arc<Config>,
    pipeline: AnalysisPipeline,
    tasks: Arc<TaskService>,
}

async fn build_app(config: Config) -> Result<App> {
    let config = Arc::new(config);

    let ctx = SourceContext {
        client: HttpClientFactory::create_client(config.http_proxy.as_deref()),
        gate: Arc::new(RateGate::new(config.gate_policies())),
        breakers: Arc::new(BreakerRegistry::new(
            3,
            Duration::from_secs(config.circuit_breaker_cooldown),
        )),
        snapshots: Arc::new(SnapshotCache::new()),
    };

    let snapshot_ttl = Duration::from_secs(config.realtime_cache_ttl);
    let sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(EastmoneyFetcher::new(
            ctx.clone(),
            config.source_priority("eastmoney"),
            snapshot_ttl,
        )),
        Arc::new(TencentFetcher::new(ctx.clone(), config.source_priority("tencent"))),
        Arc::new(SinaFetcher::new(ctx.clone(), config.source_priority("sina"))),
        Arc::new(TushareFetcher::new(
            ctx.clone(),
            config.tushare_token.clone(),
            config.source_priority("tushare"),
        )),
        Arc::new(BaostockFetcher::new(
            ctx.clone(),
            config.source_priority("baostock"),
        )),
        Arc::new(YahooFetcher::new(ctx.clone(), config.source_priority("yahoo"))),
    ];

    let manager = Arc::new(FetcherManager::new(
        sources,
        ctx.breakers.clone(),
        ManagerConfig {
            quote_preference: config.realtime_source_priority.clone(),
            enable_realtime_quote: config.enable_realtime_quote,
            enable_chip_distribution: config.enable_chip_distribution,
        },
    ));

    let db = Arc::new(Database::new(&config.database_path).await?);
    let notifier = Arc::new(NotificationService::from_config(&config, None));
    let analyzer: Arc<dyn Analyzer> = Arc::new(LlmAnalyzer::from_config(&config));
    let search: Arc<dyn SearchService> = Arc::new(RotatingSearchService::from_config(&config));

    if !analyzer.is_available() {
        warn!("No LLM configured; reports will be template-only");
    }

    let pipeline = AnalysisPipeline {
        config: config.clone(),
        manager,
        analyzer,
        search,
        db,
        notifier,
    };
    let tasks = TaskService::new(pipeline.clone(), config.max_workers);

    Ok(App {
        config,
        pipeline,
        tasks,
    })
}

async fn run_full_analysis(app: &App, args: &Args, stock_codes: Option<Vec<String>>) {
    let query_id = uuid::Uuid::new_v4().simple().to_string();

    let results = app
        .pipeline
        .run(stock_codes, &query_id, args.dry_run, !args.no_notify)
        .await;
    info!("Per-symbol analysis finished: {} results", results.len());

    if app.config.market_review_enabled && !args.no_market_review {
        // Back off before hitting the aggregate endpoints again.
        if app.config.analysis_delay > 0.0 {
            info!(
                "Waiting {:.0}s before market review",
                app.config.analysis_delay
            );
            tokio::time::sleep(Duration::from_secs_f64(app.config.analysis_delay)).await;
        }
        run_market_review(
            &app.pipeline.manager,
            &app.pipeline.analyzer,
            &app.pipeline.search,
            &app.pipeline.notifier,
            !args.no_notify,
        )
        .await;
    }
}

async fn async_main(args: Args) -> Result<i32> {
    let mut config = Config::from_env()?;

    // CLI overrides on top of the environment snapshot.
    if args.single_notify {
        config.single_stock_notify = true;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers.max(1);
    }
    if args.no_context_snapshot {
        config.save_context_snapshot = false;
    }

    setup_logging(&config, args.debug);

    info!("============================================================");
    info!("equisight starting ({})", env!("CARGO_PKG_VERSION"));
    info!("============================================================");
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let stock_codes = args.stocks.as_ref().map(|s| {
        s.split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
    });
    if let Some(codes) = &stock_codes {
        info!("Watchlist override from CLI: {:?}", codes);
    }

    let app = build_app(config).await?;

    // REST surface, when requested.
    if args.serve || args.serve_only {
        let state = ApiState {
            tasks: app.tasks.clone(),
        };
        let host = args.host.clone();
        let port = args.port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(state, &host, port).await {
                error!("API server failed: {}", e);
            }
        });
    }

    if args.serve_only {
        info!("Mode: API only (http://{}:{})", args.host, args.port);
        info!("Submit via POST /api/v1/analysis/stock/{{code}}; Ctrl+C to exit");
        tokio::signal::ctrl_c().await?;
        info!("Interrupted, exiting");
        return Ok(130);
    }

    // Market review only.
    if args.market_review {
        info!("Mode: market review only");
        run_market_review(
            &app.pipeline.manager,
            &app.pipeline.analyzer,
            &app.pipeline.search,
            &app.pipeline.notifier,
            !args.no_notify,
        )
        .await;
        return Ok(0);
    }

    // Daily schedule.
    if args.schedule || app.config.schedule_enabled {
        info!(
            "Mode: scheduled, daily at {}",
            app.config.schedule_time
        );
        let schedule_time = app.config.schedule_time.clone();
        let run_immediately = app.config.schedule_run_immediately;
        tokio::select! {
            result = scheduler::run_with_schedule(&schedule_time, run_immediately, || async {
                run_full_analysis(&app, &args, stock_codes.clone()).await;
            }) => {
                result?;
                return Ok(0);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, exiting");
                return Ok(130);
            }
        }
    }

    // One-shot run.
    run_full_analysis(&app, &args, stock_codes).await;
    info!("Run complete");

    if args.serve {
        info!("API still serving (Ctrl+C to exit)");
        tokio::signal::ctrl_c().await?;
        info!("Interrupted, exiting");
        return Ok(130);
    }

    Ok(0)
}

fn main() {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build Tokio runtime");

    let code = match runtime.block_on(async_main(args)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
