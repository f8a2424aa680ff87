use std::io::Read;
use std::process::ExitCode;
use std::rc::Rc;

use hostlua::cli::{self, CliArgs};
use hostlua::{Context, Engine, EngineConfig, Error, Status, StdioHost};

const USAGE: &str = "Usage: hostlua [-c<ini>] [-e<code>] [-d name=value]... [-i] [<file>]";

fn main() -> ExitCode {
    hostlua::init_tracing();

    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("hostlua: {e}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    // ── Engine config ─────────────────────────────────────────────────────────
    let loaded = match &args.ini {
        Some(path) => EngineConfig::load_file(path),
        None => EngineConfig::discover(),
    };
    let config = match loaded {
        Ok((config, errors)) => {
            for e in errors {
                eprintln!("hostlua: config: {e}");
            }
            config
        }
        Err(e) => {
            eprintln!("hostlua: {e}");
            return ExitCode::from(2);
        }
    };

    let engine = match Engine::with_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("hostlua: {e}");
            return ExitCode::FAILURE;
        }
    };

    let host = Rc::new(StdioHost::new());
    let code = match engine.new_context(host.clone()) {
        Ok(ctx) => {
            let code = run(&ctx, &args);
            ctx.destroy();
            code
        }
        Err(e) => {
            eprintln!("hostlua: {e}");
            ExitCode::FAILURE
        }
    };

    if args.show_headers {
        for (name, values) in host.headers().iter() {
            for value in values {
                eprintln!("{name}: {value}");
            }
        }
    }

    engine.shutdown();
    code
}

/// Bind the `-d` globals, then run the script, the `-e` code or stdin.
fn run(ctx: &Context<'_>, args: &CliArgs) -> ExitCode {
    for (name, value) in &args.defines {
        let bound = ctx
            .create(value.clone())
            .and_then(|value| ctx.bind(name, value));
        if let Err(e) = bound {
            eprintln!("hostlua: -d {name}: {e}");
            return ExitCode::from(2);
        }
    }

    let status = if let Some(script) = &args.script {
        ctx.exec(script)
    } else {
        let code = match &args.code {
            Some(code) => code.clone(),
            None => {
                let mut buf = String::new();
                if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                    eprintln!("hostlua: stdin: {e}");
                    return ExitCode::FAILURE;
                }
                buf
            }
        };
        ctx.eval(&code).map(|status| {
            status.map(|value| {
                // only `-e` echoes its result
                if args.code.is_some() && !value.is_null() {
                    println!("{}", value.as_string());
                }
            })
        })
    };

    match status {
        Ok(Status::Ok(())) => ExitCode::SUCCESS,
        Ok(Status::EarlyTermination(code)) => ExitCode::from(cli::exit_code(code)),
        // script failures already went to the host log
        Err(Error::Compile(_) | Error::Execution(_)) if ctx.engine().config().log_errors => {
            ExitCode::from(255)
        }
        Err(e) => {
            eprintln!("hostlua: {e}");
            ExitCode::from(255)
        }
    }
}
