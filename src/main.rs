use std::error::Error;

use clap::Parser;
use packlink::{
    cli::{
        args::{CliArgs, Command},
        command_handlers::write_build,
    },
    graph::MissingDescriptor,
    linker::UnresolvedImports,
    Packlink,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = CliArgs::parse();

    let mut builder = Packlink::builder().root(&cli_args.root);
    if cli_args.skip_missing_descriptors {
        builder = builder.missing_descriptor(MissingDescriptor::Skip);
    }

    match cli_args.cmd {
        Command::Build {
            package_dir,
            prefix,
            strict,
            include_dep_tests,
            no_tests,
            format,
            output,
        } => {
            if let Some(prefix) = prefix {
                builder = builder.prefix(prefix);
            }
            if strict {
                builder = builder.unresolved_imports(UnresolvedImports::Deny);
            }
            if include_dep_tests {
                builder = builder.include_dep_tests(true);
            }
            if no_tests {
                builder = builder.include_tests(false);
            }
            let packlink = builder.try_build()?;
            let build = packlink.build(&package_dir)?;
            write_build(&build, format, output.as_deref())
        }
        Command::Deps { package_dir } => {
            let packlink = builder.try_build()?;
            for name in &packlink.deps(&package_dir)? {
                println!("{name}");
            }
            Ok(())
        }
        Command::Scan { files } => {
            let packlink = builder.try_build()?;
            let mut violations = 0;
            for file in packlink.scan(&files)? {
                let requires: Vec<&str> = file.scan.requires.keys().map(String::as_str).collect();
                println!("{}", file.path.display());
                println!("  requires: {}", requires.join(", "));
                println!("  chrome: {}", file.scan.wants_chrome);
                if let Some(diagnostic) = &file.scan.diagnostic {
                    eprintln!("{diagnostic}");
                    violations += 1;
                }
            }
            if violations > 0 {
                return Err(format!("{violations} files use chrome authority without asking for it").into());
            }
            Ok(())
        }
    }
}
