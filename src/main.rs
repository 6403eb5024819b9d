use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, anyhow};
use tokio::io::AsyncWriteExt;

use xml_resolution::cli::{Cli, Command, OutputFormat};
use xml_resolution::config::{Config, ConfigError, ConfigManager};
use xml_resolution::http_client::AsyncHttpClient;
use xml_resolution::output::Output;
use xml_resolution::record::ResolutionRecord;
use xml_resolution::report::{hostname, premis_report};
use xml_resolution::store::{CollectionStatus, ResolverStore};
use xml_resolution::ResolutionError;

const EXIT_CLIENT_ERROR: u8 = 1;
const EXIT_SERVER_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity().log_level())
        .with_writer(std::io::stderr)
        .init();

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return ExitCode::from(EXIT_CLIENT_ERROR);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> u8 {
    if let Some(e) = error.downcast_ref::<ResolutionError>() {
        return if e.is_client_error() {
            EXIT_CLIENT_ERROR
        } else {
            EXIT_SERVER_ERROR
        };
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return EXIT_CLIENT_ERROR;
    }
    EXIT_SERVER_ERROR
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = ConfigManager::load_config(&cli).await?;
    tracing::debug!("Using data root {}", config.store.data_root.display());
    let store = ResolverStore::open(&config.store).await?;
    let output = Output::new(cli.verbosity());

    match cli.command {
        Command::Create { collection } => {
            let status = store.create_collection(&collection).await?;
            let verb = match status {
                CollectionStatus::Created => "created",
                CollectionStatus::Existed => "exists",
            };
            println!("{} {}", collection, verb);
        }

        Command::Collections => {
            for name in store.collections().await? {
                println!("{}", name);
            }
        }

        Command::Resolve {
            collection,
            files,
            uri,
            premis,
            format,
        } => {
            let request = ResolveRequest {
                collection,
                files,
                uri,
                premis,
                format,
            };
            return resolve_files(&store, &config, &output, request).await;
        }

        Command::Manifest {
            collection,
            output: destination,
        } => {
            let manifest = store.collection(&collection).await?.manifest().await?;
            match destination {
                Some(path) => tokio::fs::write(&path, manifest)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(manifest.as_bytes()).await?;
                    stdout.flush().await?;
                }
            }
        }

        Command::Tar { collection, output } => {
            let collection = store.collection(&collection).await?;
            let file = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("Failed to create {}", output.display()))?;
            collection.tar(file, &config.archive).await?;
            tracing::info!("Wrote {}", output.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

struct ResolveRequest {
    collection: String,
    files: Vec<PathBuf>,
    uri: Option<String>,
    premis: bool,
    format: OutputFormat,
}

async fn resolve_files(
    store: &ResolverStore,
    config: &Config,
    output: &Output,
    request: ResolveRequest,
) -> anyhow::Result<ExitCode> {
    let ResolveRequest {
        collection,
        files,
        uri,
        premis,
        format,
    } = request;
    let client = AsyncHttpClient::new(config.http_client_config())?;
    let host = hostname();
    let mut records: Vec<ResolutionRecord> = Vec::new();
    let mut worst = 0u8;

    for file in &files {
        let document_uri = match &uri {
            Some(uri) => uri.clone(),
            None => file_uri(&host, file).await?,
        };

        match resolve_one(store, config, &client, file, &document_uri, &collection).await {
            Ok(record) => {
                if premis {
                    println!("{}", premis_report(&record)?);
                } else if format == OutputFormat::Human {
                    print!("{}", output.format_resolution(&record));
                }
                records.push(record);
            }
            Err(e) => {
                eprintln!("Error: {}: {:#}", file.display(), e);
                worst = worst.max(exit_code_for(&e));
            }
        }
    }

    if !premis && format == OutputFormat::Json {
        println!("{}", output.format_json(&records)?);
    }

    Ok(if worst == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(worst)
    })
}

async fn resolve_one(
    store: &ResolverStore,
    config: &Config,
    client: &AsyncHttpClient,
    file: &Path,
    document_uri: &str,
    collection: &str,
) -> anyhow::Result<ResolutionRecord> {
    let text = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let record = store
        .resolve(&text, document_uri, client, config.resolver_options())
        .await?;
    store.save(&record, collection).await?;
    Ok(record)
}

async fn file_uri(host: &str, file: &Path) -> anyhow::Result<String> {
    let absolute = tokio::fs::canonicalize(file)
        .await
        .with_context(|| format!("Failed to locate {}", file.display()))?;
    let path = absolute
        .to_str()
        .ok_or_else(|| anyhow!("{} is not valid UTF-8", absolute.display()))?;
    Ok(format!("file://{}{}", host, path))
}
