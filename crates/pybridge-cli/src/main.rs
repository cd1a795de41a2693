use std::{env, process::ExitCode};

use pybridge::{BridgeError, HostValue};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
    pybridge version
    pybridge eval <expression> [globals-json]
    pybridge import <module> [attribute...]";

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let result = match command.as_str() {
        "version" => version(),
        "eval" => eval(rest),
        "import" => import(rest),
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        other => {
            eprintln!("unknown command '{other}'\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(json) => {
            println!("{json:#}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr, filtered by `PYBRIDGE_LOG` (`warn` when unset).
fn init_logging() {
    let filter = EnvFilter::try_from_env("PYBRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn version() -> pybridge::Result<serde_json::Value> {
    let info = pybridge::version()?;
    serde_json::to_value(&info).map_err(|err| BridgeError::Config {
        message: format!("cannot serialize version info: {err}"),
    })
}

fn eval(args: &[String]) -> pybridge::Result<serde_json::Value> {
    let Some(code) = args.first() else {
        return Err(usage_error("eval needs an expression"));
    };
    let globals = match args.get(1) {
        Some(text) => {
            let json: serde_json::Value = serde_json::from_str(text).map_err(|err| BridgeError::Config {
                message: format!("globals are not valid JSON: {err}"),
            })?;
            Some(HostValue::from_json_value(json))
        }
        None => None,
    };
    let result = pybridge::eval(code, globals.as_ref(), None)?;
    Ok(result.to_host()?.to_json_value())
}

fn import(args: &[String]) -> pybridge::Result<serde_json::Value> {
    let Some((module, path)) = args.split_first() else {
        return Err(usage_error("import needs a module name"));
    };
    let mut current = pybridge::import(module)?;
    for attribute in path {
        current = current.get(attribute)?;
    }
    tracing::debug!(module = %module, path = ?path, kind = ?current.kind(), "resolved");
    Ok(current.to_host()?.to_json_value())
}

fn usage_error(message: &str) -> BridgeError {
    BridgeError::Config {
        message: format!("{message}\n{USAGE}"),
    }
}

fn report(err: &BridgeError) {
    eprintln!("error: {err}");
    if let Some(foreign) = err.as_foreign()
        && !foreign.traceback.is_empty()
    {
        eprint!("{}", foreign.traceback);
    }
}
