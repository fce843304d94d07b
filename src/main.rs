use std::io::Write;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: rcc FILE");
        return ExitCode::from(2);
    };
    match rcc::compile_file(&path) {
        Ok(asm) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(err) = stdout.write_all(asm.as_bytes()) {
                eprintln!("rcc: {err}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("rcc: {err}");
            ExitCode::FAILURE
        }
    }
}
