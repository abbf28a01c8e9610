use std::{error::Error, sync::Arc};

use axum::{
    http::{
        header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_LANGUAGE, CONTENT_TYPE},
        Method,
    },
    routing::{get, post},
    serve, Router,
};
use clap::Parser;
use log::{error, info, warn};
use stderrlog::Timestamp;
use taskdrop::{
    catalog::TaskCatalog,
    db::{MySqlStore, RowStore},
    events::EventBus,
    handlers::{
        handle_click_dashboard_task, handle_complete_survey, handle_connect_wallet,
        handle_disconnect_wallet, handle_get_profile, handle_get_task, handle_history,
        handle_list_dashboard_tasks, handle_list_tasks, handle_list_verifications,
        handle_submit_task, handle_update_profile, handle_verify_social_task,
        handle_withdraw_check,
    },
    kv::{FileKv, KeyValueStore},
    profile::{ProfileConfig, ProfileStore},
    session::AppSession,
    verification::SimulatorConfig,
};
use tokio::{net::TcpListener, sync::broadcast::error::RecvError, task::JoinSet};
use tower_http::cors::{Any, CorsLayer};

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    #[arg(long)]
    pub mysql_user: Option<String>,

    #[arg(long)]
    pub mysql_password: Option<String>,

    #[arg(long)]
    pub mysql_host: Option<String>,

    #[arg(long, default_value_t = 3306)]
    pub mysql_port: u16,

    #[arg(long)]
    pub mysql_database: Option<String>,

    #[arg(long, default_value = "taskdrop-state.json")]
    pub state_file: String,

    #[arg(long, default_value = "10s")]
    pub verification_window: String,

    #[arg(long, default_value = "3s")]
    pub init_timeout: String,

    // Catalog attempt ordinals that are scripted to fail.
    #[arg(long, value_delimiter = ',', default_value = "1,4,5")]
    pub scripted_failures: Vec<u32>,

    // 0 = errors only, 2 = info, 4 = trace.
    #[arg(long, default_value_t = 2)]
    pub verbosity: usize,
}

fn connect_store(args: &Args) -> Option<MySqlStore> {
    let (Some(user), Some(host), Some(database)) =
        (&args.mysql_user, &args.mysql_host, &args.mysql_database)
    else {
        warn!("No database configured, running on local state only");
        return None;
    };
    let password = args.mysql_password.as_deref().unwrap_or("");
    let mysql_url = format!(
        "mysql://{}:{}@{}:{}/{}",
        user, password, host, args.mysql_port, database
    );
    let mysql_display_url = format!(
        "mysql://{}:{}@{}:{}/{}",
        user, "********", host, args.mysql_port, database
    );
    info!(
        "Connecting to the database with URL {} ...",
        mysql_display_url
    );
    match MySqlStore::connect(mysql_url.as_str()) {
        Ok(store) => {
            info!("Successfully created DB connection.");
            Some(store)
        }
        Err(err) => {
            error!("Error connecting to the database: {}", err);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let verification_window = parse_duration::parse(&args.verification_window)?;
    let init_timeout = parse_duration::parse(&args.init_timeout)?;

    stderrlog::new()
        .verbosity(args.verbosity)
        .timestamp(Timestamp::Millisecond)
        .init()?;

    let mut store: Option<Arc<dyn RowStore>> = None;
    if let Some(mysql) = connect_store(&args) {
        if let Err(err) = mysql.ensure_schema().await {
            error!("Error preparing the database schema: {}", err);
        }
        store = Some(Arc::new(mysql));
    }
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKv::open(&args.state_file)?);
    info!("Using state file {}", args.state_file);

    let profile = Arc::new(ProfileStore::new(
        store.clone(),
        ProfileConfig { init_timeout },
    ));
    let user = profile.initialize().await;
    info!("Signed in as {} ({})", user.username, user.id);

    let events = EventBus::new();
    let mut notifications = events.subscribe();
    let session = Arc::new(
        AppSession::attach(
            profile,
            store,
            kv,
            TaskCatalog::builtin(),
            SimulatorConfig {
                window: verification_window,
                scripted_failures: args.scripted_failures.clone(),
            },
            events,
        )
        .await?,
    );

    let mut exec_set: JoinSet<()> = JoinSet::new();
    exec_set.spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => info!("Notification {}", notification.name()),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} notifications", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
    {
        let session = Arc::clone(&session);
        exec_set.spawn(async move {
            for (task_id, outcome) in session.resume_pending().await {
                info!("Resumed verification of {} ended {:?}", task_id, outcome);
            }
        });
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers([ACCEPT, ACCEPT_LANGUAGE, CONTENT_LANGUAGE, CONTENT_TYPE]);

    let app = Router::new()
        .route("/", get(|| async { "Taskdrop Backend" }))
        .route(
            "/profile",
            get({
                let session = Arc::clone(&session);
                move || handle_get_profile(session)
            })
            .post({
                let session = Arc::clone(&session);
                move |input| handle_update_profile(input, session)
            }),
        )
        .route(
            "/connect_wallet",
            post({
                let session = Arc::clone(&session);
                move |input| handle_connect_wallet(input, session)
            }),
        )
        .route(
            "/disconnect_wallet",
            post({
                let session = Arc::clone(&session);
                move || handle_disconnect_wallet(session)
            }),
        )
        .route(
            "/tasks",
            get({
                let session = Arc::clone(&session);
                move || handle_list_tasks(session)
            }),
        )
        .route(
            "/tasks/:id",
            get({
                let session = Arc::clone(&session);
                move |path| handle_get_task(path, session)
            }),
        )
        .route(
            "/submit_task",
            post({
                let session = Arc::clone(&session);
                move |input| handle_submit_task(input, session)
            }),
        )
        .route(
            "/verifications",
            get({
                let session = Arc::clone(&session);
                move || handle_list_verifications(session)
            }),
        )
        .route(
            "/dashboard_tasks",
            get({
                let session = Arc::clone(&session);
                move || handle_list_dashboard_tasks(session)
            }),
        )
        .route(
            "/dashboard_tasks/click",
            post({
                let session = Arc::clone(&session);
                move |input| handle_click_dashboard_task(input, session)
            }),
        )
        .route(
            "/dashboard_tasks/verify",
            post({
                let session = Arc::clone(&session);
                move |input| handle_verify_social_task(input, session)
            }),
        )
        .route(
            "/dashboard_tasks/survey",
            post({
                let session = Arc::clone(&session);
                move |input| handle_complete_survey(input, session)
            }),
        )
        .route(
            "/history",
            get({
                let session = Arc::clone(&session);
                move || handle_history(session)
            }),
        )
        .route(
            "/withdraw_check",
            get({
                let session = Arc::clone(&session);
                move || handle_withdraw_check(session)
            }),
        )
        .layer(cors);

    let tcp_listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Starting server at port {}", args.port);
    serve(tcp_listener, app).await?;
    exec_set.abort_all();
    Ok(())
}
