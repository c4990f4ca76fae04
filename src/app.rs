use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::{BearerAuth, LogoutReason, SessionEvent, SessionManager, Store, TokenValidator};
use crate::cli::{Cli, Commands, StreamArgs, WriteMethod};
use crate::core::{Clock, Subscription, SystemClock};
use crate::error::AppError;
use crate::http::{ApiClient, Method, UreqTransport};
use crate::output::{
    NumberFormat, SessionTableOptions, StreamTableOptions, output_groups_json,
    output_records_json, output_session_json, print_group_table, print_session_table,
    print_stream_summary, status_text,
};
use crate::stream::{FlushContext, LoadObserver, LoadStatus, StreamLoader, group_counts};
use crate::utils::{Timezone, filter_json};

const PASSWORD_ENV: &str = "RIEGO_PASSWORD";

/// Print JSON output, optionally filtering through jq
fn print_json(json: &str, jq_filter: Option<&str>) -> Result<(), AppError> {
    match jq_filter {
        Some(filter) => print!("{}", filter_json(json, filter)?),
        None => println!("{json}"),
    }
    Ok(())
}

pub(crate) struct CommandContext<'a> {
    pub(crate) cli: &'a Cli,
    pub(crate) timezone: Timezone,
    pub(crate) number_format: NumberFormat,
    pub(crate) jq_filter: Option<&'a str>,
}

impl CommandContext<'_> {
    fn wants_json(&self) -> bool {
        self.cli.json || self.jq_filter.is_some()
    }
}

fn report_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::LoggedIn(session) | SessionEvent::Restored(session) => {
            tracing::debug!(user = ?session.username, "session active");
        }
        SessionEvent::LoggedOut(LogoutReason::Unauthorized) => {
            eprintln!("Session expired or revoked; run `riego login` again.");
        }
        SessionEvent::LoggedOut(reason) => tracing::debug!(?reason, "signed out"),
    }
}

/// Session, client and clock wired together for one invocation.
struct Services {
    session: SessionManager,
    api: ApiClient,
    clock: Arc<dyn Clock>,
    _subscriptions: Vec<Subscription>,
}

impl Services {
    fn connect(cli: &Cli) -> Self {
        let store = match Store::default_path() {
            Some(path) => Store::open(path),
            None => {
                tracing::warn!("no data directory found; session will not be persisted");
                Store::in_memory()
            }
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let validator = TokenValidator::new(
            cli.settings.issuer.clone(),
            cli.settings.audience.clone(),
        );
        let session = SessionManager::new(store.handle(), validator, Arc::clone(&clock));
        let api = ApiClient::new(cli.base_url(), Arc::new(UreqTransport::new()))
            .with_middleware(BearerAuth::new(session.clone()));

        let subscriptions = vec![
            session.subscribe(report_session_event),
            // Fires only for writes through another handle on this store,
            // i.e. when the manager is embedded next to other clients
            session.on_external_change(|state| {
                tracing::debug!(authenticated = state.session().is_some(), "session resynced");
            }),
        ];

        Self {
            session,
            api,
            clock,
            _subscriptions: subscriptions,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.clock.now_ms()).unwrap_or_else(Utc::now)
    }
}

fn session_options(services: &Services, ctx: &CommandContext<'_>) -> SessionTableOptions {
    SessionTableOptions {
        use_color: ctx.cli.use_color(),
        timezone: ctx.timezone,
        now: services.now(),
    }
}

fn handle_login(
    services: &Services,
    ctx: &CommandContext<'_>,
    username: &str,
    password: Option<&str>,
) -> Result<(), AppError> {
    let password = match password {
        Some(password) => password.to_string(),
        None => std::env::var(PASSWORD_ENV).map_err(|_| AppError::MissingPassword)?,
    };

    services.session.restore();
    let session = services.session.login(&services.api, username, &password)?;

    if ctx.wants_json() {
        let json = output_session_json(Some(&session), &session_options(services, ctx));
        return print_json(&json, ctx.jq_filter);
    }
    match &session.role {
        Some(role) => println!(
            "Logged in as {} ({role}).",
            session.username.as_deref().unwrap_or(username)
        ),
        None => println!(
            "Logged in as {}.",
            session.username.as_deref().unwrap_or(username)
        ),
    }
    Ok(())
}

fn handle_logout(services: &Services, ctx: &CommandContext<'_>) -> Result<(), AppError> {
    services.session.logout();
    if ctx.wants_json() {
        let json = output_session_json(None, &session_options(services, ctx));
        return print_json(&json, ctx.jq_filter);
    }
    println!("Logged out.");
    Ok(())
}

fn handle_status(services: &Services, ctx: &CommandContext<'_>) -> Result<(), AppError> {
    let session = services.session.restore();
    let options = session_options(services, ctx);
    if ctx.wants_json() {
        let json = output_session_json(session.as_ref(), &options);
        return print_json(&json, ctx.jq_filter);
    }
    print_session_table(session.as_ref(), &options);
    Ok(())
}

fn handle_get(services: &Services, ctx: &CommandContext<'_>, path: &str) -> Result<(), AppError> {
    services.session.restore();
    let value = services.api.get_json(path)?;
    let json = serde_json::to_string_pretty(&value)?;
    print_json(&json, ctx.jq_filter)
}

fn handle_send(
    services: &Services,
    ctx: &CommandContext<'_>,
    method: WriteMethod,
    path: &str,
    data: Option<&str>,
) -> Result<(), AppError> {
    let body = data
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(AppError::InvalidBody)?;
    let method = match method {
        WriteMethod::Post => Method::Post,
        WriteMethod::Put => Method::Put,
        WriteMethod::Delete => Method::Delete,
    };

    services.session.restore();
    let reply = services.api.send_json(method, path, body.as_ref())?;
    if reply.is_null() && !ctx.wants_json() {
        println!("Done.");
        return Ok(());
    }
    let json = serde_json::to_string_pretty(&reply)?;
    print_json(&json, ctx.jq_filter)
}

/// Prints loader status to stderr and stops the load at `limit` records.
struct ProgressReporter {
    show: bool,
    limit: Option<u64>,
    number_format: NumberFormat,
}

impl LoadObserver for ProgressReporter {
    fn on_status(&mut self, status: LoadStatus) {
        if self.show {
            eprintln!("{}", status_text(status, self.number_format));
        }
    }

    fn on_flush(&mut self, flush: &FlushContext<'_>) {
        tracing::debug!(
            added = flush.added,
            count = flush.count,
            progress = flush.progress,
            "batch applied"
        );
        if let Some(limit) = self.limit
            && flush.count >= limit
        {
            tracing::debug!(limit, "record limit reached; cancelling load");
            flush.cancel.cancel();
        }
    }
}

fn handle_stream(
    services: &Services,
    ctx: &CommandContext<'_>,
    args: &StreamArgs,
) -> Result<(), AppError> {
    services.session.restore();

    let path = args
        .path
        .as_deref()
        .unwrap_or(&ctx.cli.settings.stream_path);
    let loader = Arc::new(StreamLoader::new(
        ctx.cli.stream_options(args),
        Arc::clone(&services.clock),
    ));
    // Ctrl-C stops the load but still prints what arrived
    let interrupt = Arc::clone(&loader);
    if let Err(err) = ctrlc::set_handler(move || interrupt.cancel()) {
        tracing::warn!(error = %err, "could not install Ctrl-C handler");
    }
    let mut reporter = ProgressReporter {
        show: ctx.cli.show_progress(),
        limit: args.limit,
        number_format: ctx.number_format,
    };

    let mut batch = loader.load(&services.api, path, &mut reporter);
    if let Some(limit) = args.limit
        && batch.records.len() as u64 > limit
    {
        batch.records.truncate(limit as usize);
        batch.count = limit;
    }

    let groups = args
        .group_by
        .as_deref()
        .map(|field| (field, group_counts(&batch.records, field)));

    if ctx.wants_json() {
        let json = match &groups {
            Some((field, groups)) => output_groups_json(field, groups),
            None => output_records_json(&batch),
        };
        print_json(&json, ctx.jq_filter)?;
    } else {
        let options = StreamTableOptions {
            use_color: ctx.cli.use_color(),
            number_format: ctx.number_format,
            source: path,
        };
        print_stream_summary(&batch, &options);
        if let Some((field, groups)) = &groups {
            print_group_table(field, groups, &options);
        }
    }

    match batch.error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

pub(crate) fn run(cli: &Cli) -> Result<(), AppError> {
    let ctx = CommandContext {
        cli,
        timezone: Timezone::parse(cli.timezone.as_deref())?,
        number_format: NumberFormat::from_locale(cli.locale.as_deref())?,
        jq_filter: cli.jq.as_deref(),
    };
    let services = Services::connect(cli);

    match &cli.command {
        Commands::Login { username, password } => {
            handle_login(&services, &ctx, username, password.as_deref())
        }
        Commands::Logout => handle_logout(&services, &ctx),
        Commands::Status => handle_status(&services, &ctx),
        Commands::Get { path } => handle_get(&services, &ctx, path),
        Commands::Send { method, path, data } => {
            handle_send(&services, &ctx, *method, path, data.as_deref())
        }
        Commands::Stream(args) => handle_stream(&services, &ctx, args),
    }
}
