use crossterm::tty::IsTty;
use rustyline_async::{Readline, ReadlineError, SharedWriter};
use std::io::{BufRead, Lines, Stderr, StdinLock, Stdout, Write};

pub struct ShellRead {
    prompt: String,
    inner: ShellReadInner,
}

#[derive(Clone)]
pub struct ShellWrite {
    inner: ShellWriteInner,
}

enum ShellReadInner {
    Interactive(Readline, SharedWriter),
    Stream(Lines<StdinLock<'static>>),
}

enum ShellWriteInner {
    Interactive(SharedWriter),
    Stream(Stdout, Stderr),
}

/// Line editing is only used when both ends are a terminal, so piped scripts run line by line.
pub fn new_shell(prompt: String, disable_interactive: bool) -> (ShellRead, ShellWrite) {
    let interactive =
        !disable_interactive && std::io::stdin().is_tty() && std::io::stdout().is_tty();

    if interactive {
        match Readline::new(prompt.clone()) {
            Ok((read_line, writer)) => {
                return (
                    ShellRead {
                        prompt,
                        inner: ShellReadInner::Interactive(read_line, writer.clone()),
                    },
                    ShellWrite {
                        inner: ShellWriteInner::Interactive(writer),
                    },
                )
            }
            Err(err) => log::warn!("Line editing unavailable: {}", err),
        }
    }

    (
        ShellRead {
            prompt,
            inner: ShellReadInner::Stream(std::io::stdin().lock().lines()),
        },
        ShellWrite {
            inner: ShellWriteInner::Stream(std::io::stdout(), std::io::stderr()),
        },
    )
}

impl ShellRead {
    /// Next non-empty line of input. End of input exits the process.
    pub async fn read_line(&mut self) -> String {
        loop {
            let line = match &mut self.inner {
                ShellReadInner::Interactive(read, writer) => {
                    let line = match read.readline().await {
                        Ok(line) => line,
                        Err(ReadlineError::IO(err)) => {
                            eprintln!("An error occurred: {}", err);
                            proc_exit::Code::UNKNOWN.process_exit();
                        }
                        Err(ReadlineError::Eof | ReadlineError::Closed) => {
                            proc_exit::Code::SUCCESS.process_exit()
                        }
                        Err(ReadlineError::Interrupted) => proc_exit::Code::SIGINT.process_exit(),
                    };

                    read.add_history_entry(line.clone());

                    // echo back the line
                    let _ = writeln!(writer, "{}{}", self.prompt, line);

                    line
                }
                ShellReadInner::Stream(stream) => match stream.next() {
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        eprintln!("An error occurred: {}", err);
                        proc_exit::Code::UNKNOWN.process_exit();
                    }
                    None => proc_exit::Code::SUCCESS.process_exit(),
                },
            };

            let line = line.trim();
            if !line.is_empty() {
                return line.to_string();
            }
        }
    }
}

impl ShellWrite {
    pub fn out(&mut self) -> &mut dyn Write {
        match &mut self.inner {
            ShellWriteInner::Interactive(writer) => writer,
            ShellWriteInner::Stream(stdout, _) => stdout,
        }
    }

    pub fn err(&mut self) -> &mut dyn Write {
        match &mut self.inner {
            ShellWriteInner::Interactive(writer) => writer,
            ShellWriteInner::Stream(_, stderr) => stderr,
        }
    }
}

impl Clone for ShellWriteInner {
    fn clone(&self) -> Self {
        match self {
            ShellWriteInner::Interactive(w) => ShellWriteInner::Interactive(w.clone()),
            ShellWriteInner::Stream(_, _) => {
                ShellWriteInner::Stream(std::io::stdout(), std::io::stderr())
            }
        }
    }
}
