use anyhow::{bail, Context, Result};
use clap::Parser;
use seafront::{
    env::{FunctionEnv, FunctionSig, ModuleEnv},
    verify_function, LocalType, MachineConfig,
};
use std::fs;
use std::path::PathBuf;

/// seafront — verify a function body and report its graph shape.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input file holding raw function-body bytes
    input: PathBuf,

    /// Comma-separated parameter types (i32, i64, f32, f64)
    #[arg(long, default_value = "")]
    params: String,

    /// Return type, if any
    #[arg(long)]
    returns: Option<String>,

    /// Declared i32 local count
    #[arg(long, default_value_t = 0)]
    locals_i32: u32,

    /// Declared f32 local count
    #[arg(long, default_value_t = 0)]
    locals_f32: u32,

    /// Declared f64 local count
    #[arg(long, default_value_t = 0)]
    locals_f64: u32,

    /// Attach a module environment with this much linear memory (bytes)
    #[arg(long)]
    memory_size: Option<u64>,

    /// Use asm.js out-of-bounds semantics (checked loads/stores)
    #[arg(long)]
    asm_js: bool,

    /// Only verify; skip the graph summary
    #[arg(long)]
    verify_only: bool,
}

fn parse_type(text: &str) -> Result<LocalType> {
    Ok(match text {
        "i32" => LocalType::I32,
        "i64" => LocalType::I64,
        "f32" => LocalType::F32,
        "f64" => LocalType::F64,
        other => bail!("unknown value type {other:?} (expected i32/i64/f32/f64)"),
    })
}

fn parse_signature(cli: &Cli) -> Result<FunctionSig> {
    let mut params = Vec::new();
    for part in cli.params.split(',').filter(|p| !p.is_empty()) {
        params.push(parse_type(part.trim())?);
    }
    let ret = cli.returns.as_deref().map(parse_type).transpose()?;
    Ok(FunctionSig::new(ret, &params))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let body = fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;

    let sig = parse_signature(&cli)?;

    // Verification-only module window: the base address is arbitrary, only
    // the size feeds the bounds checks.
    let module = cli.memory_size.map(|size| ModuleEnv {
        mem_start: 0x10000,
        mem_end: 0x10000 + size,
        asm_js: cli.asm_js,
        ..Default::default()
    });

    let mut env = FunctionEnv::new(sig, module.as_ref());
    env.local_i32_count = cli.locals_i32;
    env.local_f32_count = cli.locals_f32;
    env.local_f64_count = cli.locals_f64;

    if cli.verify_only {
        verify_function(&env, MachineConfig::default(), &body)
            .with_context(|| format!("verification failed for {}", cli.input.display()))?;
        eprintln!("seafront: verified {} bytes", body.len());
        return Ok(());
    }

    let graph = seafront::build_graph(&env, MachineConfig::default(), &body)
        .with_context(|| format!("verification failed for {}", cli.input.display()))?;

    eprintln!(
        "seafront: verified {} bytes, built {} nodes",
        body.len(),
        graph.node_count()
    );
    for (mnemonic, count) in graph.operator_census() {
        println!("{count:6}  {mnemonic}");
    }
    Ok(())
}
