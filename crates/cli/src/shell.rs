//! Interactive shell front-end.
//!
//! Plain lines execute synchronously and print the exit code and the
//! combined output. `bg`, `logs`, `kill` and `ps` manage background
//! commands; `exit` (or EOF) leaves the loop.

use {
    anyhow::Result,
    drydock_engine::CommandExecutor,
    tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};

const HELP: &str = "\
commands:
  <shell command>   run synchronously and print the result
  bg <command>      start in the background, print its id
  logs <id>         print new output of a background command
  kill <id>         terminate a background command
  ps                list background commands
  exit              quit";

pub async fn run(executor: &CommandExecutor) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    println!(
        "drydock shell ({} backend) — 'help' for commands",
        executor.backend_name()
    );

    loop {
        stdout.write_all(b">>> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break; // EOF
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "exit" | "quit" => break,
            "help" => println!("{HELP}"),
            "ps" => {
                for (id, command, pid) in executor.list_background().await {
                    let pid = pid.map_or_else(|| "?".into(), |p| p.to_string());
                    println!("[{id}] pid {pid}  {command}");
                }
            },
            _ => dispatch(executor, line).await,
        }
    }
    Ok(())
}

async fn dispatch(executor: &CommandExecutor, line: &str) {
    if let Some(command) = line.strip_prefix("bg ") {
        match executor.execute_in_background(command.trim()).await {
            Ok(id) => println!("[{id}] started"),
            Err(e) => println!("error: {e}"),
        }
        return;
    }
    if let Some(rest) = line.strip_prefix("logs ") {
        match parse_id(rest) {
            Some(id) => match executor.read_logs(id).await {
                Ok(logs) => print!("{logs}"),
                Err(e) => println!("error: {e}"),
            },
            None => println!("usage: logs <id>"),
        }
        return;
    }
    if let Some(rest) = line.strip_prefix("kill ") {
        match parse_id(rest) {
            Some(id) => match executor.kill_background(id).await {
                Ok(()) => println!("[{id}] killed"),
                Err(e) => println!("error: {e}"),
            },
            None => println!("usage: kill <id>"),
        }
        return;
    }
    match executor.execute(line).await {
        Ok(result) => {
            println!("exit code: {}", result.exit_code);
            if !result.output.is_empty() {
                print!("{}", result.output);
                if !result.output.ends_with('\n') {
                    println!();
                }
            }
        },
        Err(e) => println!("error: {e}"),
    }
}

fn parse_id(arg: &str) -> Option<u64> {
    arg.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_parsing() {
        assert_eq!(parse_id(" 7 "), Some(7));
        assert_eq!(parse_id("abc"), None);
        assert_eq!(parse_id(""), None);
    }
}
