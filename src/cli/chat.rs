use anyhow::Result;
use futures_util::StreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Write};

use crate::ai::chat::{CHAT_TIPS, ChatRole, RoleChat};
use crate::openai::Client;

fn print_welcome(chat: &RoleChat) {
    if let Some(msg) = chat.transcript().last() {
        println!("{} {}", chat.role().emoji(), msg.content);
    }
}

pub async fn run(client: Option<Client>, role: ChatRole) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut chat = RoleChat::new(role)?;

    println!("Type in English! Commands: /reset, /tips, /history (Ctrl-D to leave)\n");
    print_welcome(&chat);

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                match line {
                    "" => continue,
                    "/reset" => {
                        chat.reset()?;
                        print_welcome(&chat);
                        continue;
                    }
                    "/tips" => {
                        for tip in CHAT_TIPS {
                            println!("  - {}", tip);
                        }
                        continue;
                    }
                    "/history" => {
                        println!(
                            "You've chatted with {} for {} rounds. Keep going!",
                            role.description(),
                            chat.rounds()
                        );
                        continue;
                    }
                    _ => {}
                }
                rl.add_history_entry(line)?;

                let mut fragments = chat.reply(client.as_ref(), line)?;
                let mut reply = String::new();

                print!("{} ", role.emoji());
                while let Some(fragment) = fragments.next().await {
                    print!("{}", fragment);
                    io::stdout().flush()?;
                    reply.push_str(&fragment);
                }
                println!();

                chat.record_reply(&reply);
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
