use std::{path::Path, process, sync::Arc};

use folio::{
    application::{
        content::ContentService,
        error::{AppError, PipelineError},
        loader::{DocumentSource, InMemorySource},
        render::{RenderPipelineConfig, RenderService, configure_render_service, render_service},
    },
    config,
    domain::{
        document::{Document, DocumentKind},
        slug::derive_slug,
    },
    infra::{
        content_api::HttpContentSource,
        error::InfraError,
        http::{self, PreviewState},
        telemetry,
    },
};
use serde::Serialize;
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    configure_render_service(RenderPipelineConfig::from(&settings.render))
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    match command {
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::RenderFile(args) => run_render_file(args).await,
        config::Command::RenderAll(args) => run_render_all(settings, args).await,
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

fn renderer() -> Arc<dyn RenderService> {
    render_service()
}

fn remote_source(settings: &config::Settings) -> Result<Arc<dyn DocumentSource>, AppError> {
    let source = HttpContentSource::from_settings(&settings.source)?.ok_or_else(|| {
        InfraError::configuration("source.base_url is not configured (set FOLIO__SOURCE__BASE_URL)")
    })?;
    Ok(Arc::new(source))
}

fn kind_for(page: bool) -> DocumentKind {
    if page {
        DocumentKind::Page
    } else {
        DocumentKind::Post
    }
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let content = ContentService::new(remote_source(&settings)?, renderer());
    let rendered = content.render(kind_for(args.page), &args.slug).await?;
    print_json(&rendered)
}

async fn run_render_file(args: config::RenderFileArgs) -> Result<(), AppError> {
    let body = tokio::fs::read_to_string(&args.path)
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    let slug = match args.slug {
        Some(slug) => slug,
        None => slug_from_path(&args.path)?,
    };
    let created_at = match args.created_at {
        Some(created_at) => created_at,
        None => OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| AppError::unexpected(err.to_string()))?,
    };
    let document = Document::new(slug, body, created_at).with_kind(kind_for(args.page));

    let content = ContentService::new(Arc::new(InMemorySource::new()), renderer());
    let rendered = content.render_document(document).await?;
    print_json(&rendered)
}

fn slug_from_path(path: &Path) -> Result<String, AppError> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    derive_slug(stem).map_err(|err| {
        AppError::validation(format!(
            "cannot derive a slug from `{}`: {err}; pass --slug",
            path.display()
        ))
    })
}

async fn run_render_all(
    settings: config::Settings,
    args: config::RenderAllArgs,
) -> Result<(), AppError> {
    let content = ContentService::new(remote_source(&settings)?, renderer());
    let concurrency = settings.batch.concurrency.get();
    let total = args.slugs.len();

    info!(
        target = "folio::render_all",
        concurrency,
        documents = total,
        kind = kind_for(args.page).as_str(),
        "Starting render-all"
    );

    let results = content
        .render_many(kind_for(args.page), args.slugs, concurrency)
        .await;

    let mut failed = 0usize;
    for (slug, result) in results {
        let line = match result {
            Ok(rendered) => json!({ "slug": slug, "result": rendered }),
            Err(err) => {
                failed += 1;
                failure_line(&slug, &err)
            }
        };
        println!("{line}");
    }

    info!(
        target = "folio::render_all",
        documents = total,
        failed,
        "Render-all completed"
    );

    if failed > 0 {
        return Err(AppError::validation(format!(
            "{failed} of {total} documents failed to render"
        )));
    }
    Ok(())
}

fn failure_line(slug: &str, err: &PipelineError) -> serde_json::Value {
    json!({
        "slug": slug,
        "error": err.to_string(),
        "location": err.location(),
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let content = Arc::new(ContentService::new(remote_source(&settings)?, renderer()));
    let state = PreviewState::new(content, settings.server.cache_capacity);
    http::serve(settings.server.addr, http::build_router(state)).await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
