/// isojit - JIT host probe CLI
use isojit::config::RuntimeConfig;
use isojit::jit::{ensure_initialized_with, JitHost, SymbolResolver, SymbolTarget};
use isojit::runtime::{Compartment, MAX_GLOBAL_BYTES};
use std::env;
use std::path::Path;
use std::process;
use tracing::Level;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("isojit v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    isojit [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help             Print this help message");
    eprintln!("    -V, --version          Print version information");
    eprintln!("    -c, --config <FILE>    Load runtime configuration from a TOML file");
    eprintln!("    -r, --resolve <NAME>   Resolve NAME through the symbol allow-list");
    eprintln!("    --symbols              List the symbol allow-list and host addresses");
    eprintln!("    --contexts <N>         Create N contexts in a probe compartment (default: 4)");
    eprintln!("    -v                     Increase log verbosity (repeatable)");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    isojit --symbols");
    eprintln!("    isojit -vv --config isojit.toml --contexts 64");
    eprintln!("    isojit --resolve memcpy");
}

fn print_version() {
    println!("isojit {}", VERSION);
}

struct Options {
    config: Option<String>,
    resolve: Vec<String>,
    list_symbols: bool,
    contexts: usize,
    verbosity: u8,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut config = None;
    let mut resolve = Vec::new();
    let mut list_symbols = false;
    let mut contexts = 4;
    let mut verbosity = 0u8;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-V" | "--version" => {
                print_version();
                process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing file after --config".to_string());
                }
                config = Some(args[i].clone());
            }
            "-r" | "--resolve" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing symbol name after --resolve".to_string());
                }
                resolve.push(args[i].clone());
            }
            "--symbols" => {
                list_symbols = true;
            }
            "--contexts" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing count after --contexts".to_string());
                }
                contexts = args[i]
                    .parse()
                    .map_err(|e| format!("Invalid context count '{}': {}", args[i], e))?;
            }
            arg if arg.len() > 1 && arg.starts_with('-') && arg[1..].chars().all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((arg.len() - 1) as u8);
            }
            arg => {
                return Err(format!("Unknown option: {}", arg));
            }
        }
        i += 1;
    }

    Ok(Options {
        config,
        resolve,
        list_symbols,
        contexts,
        verbosity,
    })
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&str>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => RuntimeConfig::load(Path::new(path))
            .map_err(|e| format!("Failed to load config '{}': {}", path, e)),
        None => Ok(RuntimeConfig::default()),
    }
}

fn print_host(host: &JitHost) {
    println!("target:        {}", host.triple());
    println!("pointer bytes: {}", host.pointer_bytes());
    println!("opt level:     {}", host.config().opt_level.as_flag());
}

fn print_symbols(resolver: &SymbolResolver) {
    println!("allow-listed symbols ({}):", resolver.entries().len());
    for entry in resolver.entries() {
        match entry.target {
            SymbolTarget::Builtin(f) => println!("    {:<24} {:p} (builtin)", entry.name, f.addr()),
            SymbolTarget::Host(lookup) => match resolver.jit_host().lookup_host_symbol(lookup) {
                Some(addr) if lookup == entry.name => println!("    {:<24} {:p}", entry.name, addr),
                Some(addr) => println!("    {:<24} {:p} (via {})", entry.name, addr, lookup),
                None => println!("    {:<24} <missing: {}>", entry.name, lookup),
            },
        }
    }
}

fn resolve_names(resolver: &SymbolResolver, names: &[String]) -> Result<(), String> {
    for name in names {
        let entry = resolver
            .entries()
            .iter()
            .find(|entry| entry.name == name.as_str())
            .ok_or_else(|| format!("Symbol '{}' is not on the allow-list", name))?;
        // Resolution treats a missing host symbol as fatal, so check first.
        if let SymbolTarget::Host(lookup) = entry.target {
            if resolver.jit_host().lookup_host_symbol(lookup).is_none() {
                return Err(format!("Symbol '{}' is allow-listed but missing from the host", name));
            }
        }
        if let Some(addr) = resolver.resolve(name) {
            println!("{} = {:p}", name, addr);
        }
    }
    Ok(())
}

fn probe_compartment(config: &RuntimeConfig, contexts: usize) -> Result<(), String> {
    let template: Vec<u8> = (0..64u8).collect();
    let compartment = Compartment::with_config(&template, &config.compartment)
        .map_err(|e| format!("Failed to create compartment: {}", e))?;

    let mut held = Vec::with_capacity(contexts);
    for _ in 0..contexts {
        let context = compartment
            .create_context()
            .map_err(|e| format!("Failed to create context: {}", e))?;
        // SAFETY: the context was just created and is not shared.
        if unsafe { context.global_bytes() } != template.as_slice() {
            return Err(format!("Context {} does not match the globals template", context.id()));
        }
        held.push(context);
    }
    if let Some(first) = held.first() {
        first.finalize();
    }

    let stats = compartment.stats();
    println!("compartment:   {} global bytes (max {})", compartment.num_global_bytes(), MAX_GLOBAL_BYTES);
    println!("  stride:      {} bytes", compartment.context_stride());
    println!("  contexts:    {} created, {} live, {} max", stats.slots, stats.live, compartment.max_contexts());
    println!("  committed:   {} of {} reserved bytes", stats.committed_bytes, stats.reserved_bytes);
    Ok(())
}

fn run(options: &Options) -> Result<(), String> {
    let config = load_config(options.config.as_deref())?;
    let host = ensure_initialized_with(&config.jit).map_err(|e| e.to_string())?;
    let resolver = SymbolResolver::host().map_err(|e| e.to_string())?;

    print_host(host);
    if options.list_symbols {
        print_symbols(&resolver);
    }
    resolve_names(&resolver, &options.resolve)?;
    probe_compartment(&config, options.contexts)
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    init_logging(options.verbosity);

    if let Err(e) = run(&options) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
