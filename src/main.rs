use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dctextract::{
    config::Config,
    merge::{merge_tables, CollisionRule},
    pipeline::{run_extract, ExtractJob, MergeStep},
    process::decode::{Encoding, SentinelPreset, SentinelSpec, TextBlankPolicy},
    report::Coverage,
    reshape::{reshape_long, PanelSpec, ReshapeMode},
    schema::{
        load_dictionary,
        search::{hit_names, search, Category},
        FieldSelection, WidthPolicy,
    },
    table::{read_table, write_table},
};
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "dctextract",
    version,
    about = "Extract variables from fixed-width survey files described by a Stata dictionary"
)]
struct Cli {
    /// YAML config; flags override its values
    #[arg(long, global = true, env = "DCTEXTRACT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract fields from the flat file, optionally merging and reporting
    Extract(ExtractArgs),
    /// Merge an already extracted table onto a canonical table
    Merge(MergeArgs),
    /// List dictionary variables by category
    Search(SearchArgs),
    /// Print or write the coverage report of a table
    Report(ReportArgs),
    /// Reshape a wide table to one row per subject per wave
    Reshape(ReshapeArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Stata .dct dictionary
    #[arg(long, env = "DCTEXTRACT_DICTIONARY")]
    dictionary: PathBuf,

    /// Fixed-width flat data file
    #[arg(long, env = "DCTEXTRACT_DATA")]
    data: PathBuf,

    /// Variable names, comma separated
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// File with one variable name per line
    #[arg(long)]
    fields_file: Option<PathBuf>,

    /// Regex over variable names (repeatable)
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// Extract every variable in the dictionary
    #[arg(long, conflicts_with_all = ["fields", "fields_file", "patterns"])]
    all: bool,

    /// Extracted table (.csv or .parquet)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Canonical table to merge onto
    #[arg(long, env = "DCTEXTRACT_CANONICAL", requires = "merged_output")]
    canonical: Option<PathBuf>,

    #[arg(long, default_value = "childid")]
    canonical_id: String,

    #[arg(long, default_value = "CHILDID")]
    extracted_id: String,

    /// Merged table (.csv or .parquet)
    #[arg(long, requires = "canonical")]
    merged_output: Option<PathBuf>,

    /// Coverage report path
    #[arg(long)]
    report: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

/// Flags layered over the config file.
#[derive(Args, Debug)]
struct Overrides {
    /// Physical lines per record; defaults to the dictionary's _lines(N)
    #[arg(long, env = "DCTEXTRACT_LINES_PER_RECORD")]
    lines_per_record: Option<usize>,

    #[arg(long, value_enum)]
    width_policy: Option<WidthArg>,

    #[arg(long, value_enum)]
    sentinels: Option<SentinelArg>,

    #[arg(long, value_enum)]
    text_blank: Option<TextBlankArg>,

    #[arg(long, value_enum)]
    encoding: Option<EncodingArg>,

    #[arg(long)]
    batch_rows: Option<usize>,

    #[arg(long, value_enum)]
    on_collision: Option<CollisionArg>,
}

#[derive(Args, Debug)]
struct MergeArgs {
    #[arg(long)]
    extracted: PathBuf,

    #[arg(long, env = "DCTEXTRACT_CANONICAL")]
    canonical: PathBuf,

    #[arg(long, default_value = "childid")]
    canonical_id: String,

    #[arg(long, default_value = "CHILDID")]
    extracted_id: String,

    #[arg(long)]
    output: PathBuf,

    #[arg(long, value_enum)]
    on_collision: Option<CollisionArg>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(long, env = "DCTEXTRACT_DICTIONARY")]
    dictionary: PathBuf,

    /// YAML map of category name to regex list
    #[arg(long)]
    categories: Option<PathBuf>,

    /// Ad hoc regex, grouped under "pattern" (repeatable)
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// Match descriptions as well as names
    #[arg(long)]
    descriptions: bool,

    /// Examples printed per category
    #[arg(long, default_value_t = 10)]
    limit: usize,

    /// Write every hit name to this file, one per line
    #[arg(long)]
    emit_fields: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[arg(long)]
    input: PathBuf,

    /// Defaults to stdout
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "AVAILABLE VARIABLES")]
    title: String,
}

#[derive(Args, Debug)]
struct ReshapeArgs {
    #[arg(long)]
    input: PathBuf,

    /// YAML panel layout
    #[arg(long)]
    panel: PathBuf,

    #[arg(long, value_enum, default_value = "flexible")]
    mode: ModeArg,

    #[arg(long)]
    output: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WidthArg {
    Declared,
    NextColumn,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SentinelArg {
    Minimal,
    Broad,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TextBlankArg {
    Missing,
    Empty,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EncodingArg {
    Latin1,
    Utf8,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CollisionArg {
    PreferCanonical,
    Suffix,
    Fail,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Flexible,
    Complete,
}

impl From<CollisionArg> for CollisionRule {
    fn from(a: CollisionArg) -> Self {
        match a {
            CollisionArg::PreferCanonical => CollisionRule::PreferCanonical,
            CollisionArg::Suffix => CollisionRule::Suffix,
            CollisionArg::Fail => CollisionRule::Fail,
        }
    }
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(n) = self.lines_per_record {
            config.lines_per_record = Some(n);
        }
        match self.width_policy {
            Some(WidthArg::Declared) if !matches!(config.width, WidthPolicy::Declared { .. }) => {
                config.width = WidthPolicy::default();
            }
            Some(WidthArg::NextColumn)
                if !matches!(config.width, WidthPolicy::NextColumn { .. }) =>
            {
                config.width = WidthPolicy::next_column();
            }
            _ => {}
        }
        if let Some(s) = self.sentinels {
            config.sentinels = SentinelSpec::Preset(match s {
                SentinelArg::Minimal => SentinelPreset::Minimal,
                SentinelArg::Broad => SentinelPreset::Broad,
            });
        }
        if let Some(t) = self.text_blank {
            config.text_blank = match t {
                TextBlankArg::Missing => TextBlankPolicy::Missing,
                TextBlankArg::Empty => TextBlankPolicy::Empty,
            };
        }
        if let Some(e) = self.encoding {
            config.encoding = match e {
                EncodingArg::Latin1 => Encoding::Latin1,
                EncodingArg::Utf8 => Encoding::Utf8,
            };
        }
        if let Some(n) = self.batch_rows {
            config.batch_rows = n;
        }
        if let Some(c) = self.on_collision {
            config.merge.on_collision = c.into();
        }
    }
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    // ─── 2) config file, then flags ──────────────────────────────────
    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_ref())?;

    match cli.command {
        Command::Extract(args) => {
            args.overrides.apply(&mut config);
            extract(args, &config)
        }
        Command::Merge(args) => {
            if let Some(c) = args.on_collision {
                config.merge.on_collision = c.into();
            }
            merge(args, &config)
        }
        Command::Search(args) => search_dictionary(args, &config),
        Command::Report(args) => report(args),
        Command::Reshape(args) => reshape(args),
    }
}

fn extract(args: ExtractArgs, config: &Config) -> Result<()> {
    let selection = if args.all {
        FieldSelection::All
    } else if !args.patterns.is_empty() {
        FieldSelection::patterns(&args.patterns)?
    } else {
        let mut names = args.fields;
        if let Some(path) = &args.fields_file {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading field list {:?}", path))?;
            names.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from),
            );
        }
        FieldSelection::names(names)
    };

    let merge = match (args.canonical, args.merged_output) {
        (Some(canonical), Some(output)) => Some(MergeStep {
            canonical,
            canonical_id: args.canonical_id,
            extracted_id: args.extracted_id,
            output,
        }),
        _ => None,
    };

    let job = ExtractJob {
        dictionary: args.dictionary,
        data: args.data,
        selection,
        output: args.output,
        merge,
        report: args.report,
    };
    let run = run_extract(&job, config)?;
    info!(
        records = run.extraction.records,
        fields = run.schema.fields.len(),
        not_found = run.schema.missing.len(),
        "done"
    );
    if let Some((_, summary)) = &run.merged {
        info!(
            matched = summary.matched,
            unmatched = summary.unmatched,
            unused_extracted = summary.unused_extracted,
            "merge summary"
        );
    }
    Ok(())
}

fn merge(args: MergeArgs, config: &Config) -> Result<()> {
    if !args.canonical.is_file() {
        return Err(dctextract::ExtractError::CanonicalNotFound(args.canonical).into());
    }
    let extracted = read_table(&args.extracted)?;
    let canonical = read_table(&args.canonical)?;
    let (merged, summary) = merge_tables(
        &canonical,
        &args.canonical_id,
        &extracted,
        &args.extracted_id,
        &config.merge,
    )?;
    write_table(&args.output, &merged)?;
    info!(
        path = %args.output.display(),
        matched = summary.matched,
        unmatched = summary.unmatched,
        "wrote merged table"
    );
    Ok(())
}

fn search_dictionary(args: SearchArgs, config: &Config) -> Result<()> {
    let dict = load_dictionary(&args.dictionary, config.encoding)?;
    let mut categories = match &args.categories {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading categories {:?}", path))?;
            Category::from_yaml(&text)?
        }
        None => Vec::new(),
    };
    if !args.patterns.is_empty() {
        categories.push(Category::new("pattern", &args.patterns)?);
    }
    if categories.is_empty() {
        anyhow::bail!("nothing to search for: pass --categories or --pattern");
    }

    let hits = search(&dict, &categories, args.descriptions);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for hit in &hits {
        writeln!(out, "{} ({} variables)", hit.category, hit.entries.len())?;
        for e in hit.entries.iter().take(args.limit) {
            writeln!(
                out,
                "  {:<20} {}",
                e.name,
                e.description.as_deref().unwrap_or("")
            )?;
        }
        if hit.entries.len() > args.limit {
            writeln!(out, "  ... and {} more", hit.entries.len() - args.limit)?;
        }
    }

    if let Some(path) = &args.emit_fields {
        let names = hit_names(&dict, &hits);
        fs::write(path, names.join("\n") + "\n")
            .with_context(|| format!("writing field list {:?}", path))?;
        info!(path = %path.display(), fields = names.len(), "wrote field list");
    }
    Ok(())
}

fn report(args: ReportArgs) -> Result<()> {
    let table = read_table(&args.input)?;
    match &args.output {
        Some(path) => {
            dctextract::write_coverage(path, &args.title, &table, &[])?;
        }
        None => {
            let stdout = io::stdout();
            Coverage::of(&table).render(&mut stdout.lock(), &args.title, &[])?;
        }
    }
    Ok(())
}

fn reshape(args: ReshapeArgs) -> Result<()> {
    let panel = PanelSpec::load(&args.panel)?;
    let wide = read_table(&args.input)?;
    let mode = match args.mode {
        ModeArg::Flexible => ReshapeMode::Flexible,
        ModeArg::Complete => ReshapeMode::Complete,
    };
    let (long, summary) = reshape_long(&wide, &panel, mode)?;
    write_table(&args.output, &long)?;
    info!(
        path = %args.output.display(),
        rows = long.num_rows(),
        kept = summary.kept.len(),
        dropped = ?summary.dropped,
        "wrote long table"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: [&str; 6] = [
        "dctextract",
        "extract",
        "--dictionary",
        "k.dct",
        "--data",
        "k.dat",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(BASE.iter().chain(extra))
    }

    #[test]
    fn merge_flags_come_in_pairs() {
        assert!(parse(&["--merged-output", "m.csv"]).is_err());
        assert!(parse(&["--canonical", "c.csv"]).is_err());
        assert!(parse(&["--canonical", "c.csv", "--merged-output", "m.csv"]).is_ok());
    }
}
