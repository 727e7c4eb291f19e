//! Simcat admin command line.
//!
//! Opens the model directory the way the service does and runs one catalog,
//! read, workset or cleanup operation against it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use simcat_core::config::AppConfig;
use simcat_core::read::{read_output_table, read_parameter};
use simcat_core::workset::{self, ParamRunSetPub, WorksetPub};
use simcat_core::{
    CleanupOutcome, ParameterCsvConverter, ReadLayout, ReadParamLayout, ReadTableLayout,
    ServiceConfig, SimcatService, TableCsvConverter, TableValueKind, ValueMode,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = AppConfig::APP_NAME)]
#[command(about = "Admin tool for simcat model databases")]
struct Args {
    /// Directory with model database files
    #[arg(long, env = "SIMCAT_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// JSON service configuration file
    #[arg(short, long, env = "SIMCAT_CONFIG")]
    config: Option<PathBuf>,

    /// Database cleanup command, overrides the configuration file
    #[arg(long, env = "SIMCAT_CLEANUP_COMMAND")]
    cleanup_command: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List open models
    Models,
    /// List model runs
    Runs { model: String },
    /// List worksets
    Worksets { model: String },
    /// Show a workset with its parameter list
    Workset { model: String, name: String },
    /// Write parameter values as CSV
    Param {
        model: String,
        /// Run digest, stamp or name, or workset name with --from-set
        source: String,
        name: String,
        #[arg(long)]
        from_set: bool,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Write output table values of a completed run as CSV
    Table {
        model: String,
        run: String,
        name: String,
        #[arg(long, value_enum, default_value = "expr")]
        kind: KindArg,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Replace parameter values of a workset from a CSV file
    Upload {
        model: String,
        workset: String,
        param: String,
        csv: PathBuf,
        #[arg(long, default_value = "1")]
        sub_count: i32,
        /// CSV holds enum ids instead of codes
        #[arg(long)]
        ids: bool,
    },
    /// Set or clear the read-only flag of a workset
    Readonly {
        model: String,
        workset: String,
        #[arg(action = clap::ArgAction::Set)]
        readonly: bool,
    },
    /// Delete a workset
    DeleteSet { model: String, workset: String },
    /// Copy a parameter from a completed run into a workset
    CopyFromRun {
        model: String,
        workset: String,
        param: String,
        run: String,
    },
    /// Copy a parameter from a read-only workset into another workset
    CopyFromSet {
        model: String,
        workset: String,
        param: String,
        source: String,
    },
    /// Close a model and run the database cleanup command on its file
    Cleanup { model: String },
    /// List cleanup logs, or print one
    Logs { name: Option<String> },
}

#[derive(clap::Args, Debug)]
struct PageArgs {
    #[arg(long, default_value = "0")]
    offset: i64,
    /// Page size, 0 reads all rows
    #[arg(long, default_value = "0")]
    size: i64,
    /// Write enum ids instead of codes
    #[arg(long)]
    ids: bool,
}

impl PageArgs {
    fn layout(&self, name: &str) -> ReadLayout {
        ReadLayout::new(name)
            .with_page(self.offset, self.size)
            .with_mode(self.mode())
    }

    fn mode(&self) -> ValueMode {
        if self.ids {
            ValueMode::Id
        } else {
            ValueMode::Code
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Expr,
    Acc,
    AllAcc,
}

impl From<KindArg> for TableValueKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Expr => TableValueKind::Expr,
            KindArg::Acc => TableValueKind::Acc,
            KindArg::AllAcc => TableValueKind::AllAcc,
        }
    }
}

fn load_config(args: &Args) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => match &args.model_dir {
            Some(dir) => ServiceConfig::new(dir),
            None => bail!("either --model-dir or --config is required"),
        },
    };
    if let Some(dir) = &args.model_dir {
        config.model_dir = dir.clone();
    }
    if let Some(cmd) = &args.cleanup_command {
        config.cleanup_command = Some(cmd.clone());
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = load_config(&args)?;
    info!("{} model directory: {}", AppConfig::APP_NAME, config.model_dir.display());
    let service = SimcatService::start(config)?;
    let catalog = service.catalog();

    match args.command {
        Cmd::Models => print_json(&catalog.model_list()?)?,
        Cmd::Runs { model } => print_json(&catalog.run_list(&model)?)?,
        Cmd::Worksets { model } => print_json(&catalog.workset_list(&model)?)?,
        Cmd::Workset { model, name } => {
            print_json(&workset::workset_pub(catalog, &model, &name)?)?
        }

        Cmd::Param {
            model,
            source,
            name,
            from_set,
            page,
        } => {
            let layout = ReadParamLayout {
                layout: page.layout(&name),
                is_from_set: from_set,
            };
            let result = read_parameter(catalog, &model, &source, &layout)?;

            let meta = catalog.model_meta(&model)?;
            let format = service.double_format()?;
            let conv = ParameterCsvConverter::new(&meta, &name, page.mode(), format)?;
            let mut writer = csv::Writer::from_writer(std::io::stdout().lock());
            writer.write_record(conv.header())?;
            let mut row = Vec::new();
            for cell in &result.cells {
                conv.to_csv_row(cell, &mut row)?;
                writer.write_record(&row)?;
            }
            writer.flush()?;
        }

        Cmd::Table {
            model,
            run,
            name,
            kind,
            page,
        } => {
            let layout = ReadTableLayout {
                layout: page.layout(&name),
                value_kind: kind.into(),
            };
            let result = read_output_table(catalog, &model, &run, &layout)?;

            let meta = catalog.model_meta(&model)?;
            let conv = TableCsvConverter::new(
                &meta,
                &name,
                kind.into(),
                page.mode(),
                service.double_format()?,
            )?;
            let mut writer = csv::Writer::from_writer(std::io::stdout().lock());
            writer.write_record(conv.header())?;
            let mut row = Vec::new();
            for cell in &result.cells {
                conv.to_csv_row(cell, &mut row)?;
                writer.write_record(&row)?;
            }
            writer.flush()?;
        }

        Cmd::Upload {
            model,
            workset: set_name,
            param,
            csv,
            sub_count,
            ids,
        } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let wp = WorksetPub::new(&model, &set_name);
            let mut pp = ParamRunSetPub::new(&param);
            pp.sub_count = sub_count;
            let mode = if ids { ValueMode::Id } else { ValueMode::Code };
            let existed =
                workset::update_workset_parameter(catalog, false, &wp, &pp, Some(file), mode)?;
            info!(
                "Parameter {} {} in workset {}",
                param,
                if existed { "updated" } else { "added" },
                set_name
            );
        }

        Cmd::Readonly {
            model,
            workset: set_name,
            readonly,
        } => {
            let (_, row) = workset::update_workset_readonly(catalog, &model, &set_name, readonly)?;
            print_json(&row)?;
        }

        Cmd::DeleteSet {
            model,
            workset: set_name,
        } => {
            if !workset::delete_workset(catalog, &model, &set_name)? {
                info!("Workset {} not found", set_name);
            }
        }

        Cmd::CopyFromRun {
            model,
            workset: set_name,
            param,
            run,
        } => workset::copy_parameter_from_run(catalog, &model, &set_name, &param, &run)?,

        Cmd::CopyFromSet {
            model,
            workset: set_name,
            param,
            source,
        } => workset::copy_parameter_between_worksets(catalog, &model, &set_name, &param, &source)?,

        Cmd::Cleanup { model } => {
            let info = catalog
                .model_list()?
                .into_iter()
                .find(|m| m.digest == model || m.name == model)
                .with_context(|| format!("model not found: {}", model))?;
            catalog.close_model(&info.digest)?;

            let ticket = service
                .cleanup()
                .start_cleanup(&info.db_path, &info.name, &info.digest)?;
            let log_name = ticket.log_name.clone();
            info!("Cleanup log: {}", log_name);

            let outcome = ticket.wait().await;
            print!("{}", service.cleanup().read_cleanup_log(&log_name)?);
            if let CleanupOutcome::Failed(reason) = outcome {
                bail!("cleanup failed: {}", reason);
            }
        }

        Cmd::Logs { name: None } => {
            for name in service.cleanup().list_cleanup_logs()? {
                println!("{}", name);
            }
        }
        Cmd::Logs { name: Some(name) } => {
            print!("{}", service.cleanup().read_cleanup_log(&name)?)
        }
    }

    Ok(())
}
