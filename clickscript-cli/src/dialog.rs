use colored::*;
use std::io::{self, BufRead, Write};

use clickscript::{DialogChoice, DialogRequest};

/// Reads an answer such as `c`, `r`, `s` or `j <label>`.
pub fn parse_choice(line: &str, labels: &[String]) -> Option<DialogChoice> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match word.to_lowercase().as_str() {
        "c" | "continue" => Some(DialogChoice::Continue),
        "r" | "restart" => Some(DialogChoice::Restart),
        "s" | "stop" => Some(DialogChoice::Stop),
        "j" | "jump" => {
            let label = rest.trim();
            labels
                .iter()
                .any(|known| known == label)
                .then(|| DialogChoice::JumpTo(label.to_string()))
        }
        _ => None,
    }
}

/// Asks on the terminal until a valid answer arrives. End of input stops the run.
pub fn prompt(request: &DialogRequest) -> DialogChoice {
    println!();
    match request.category {
        Some(category) => println!(
            "{} command #{} ({}): {}",
            "⚠".yellow(),
            request.index,
            category,
            request.message
        ),
        None => println!("{} command #{}: {}", "⏸".cyan(), request.index, request.message),
    }
    if !request.labels.is_empty() {
        println!("  labels: {}", request.labels.join(", ").dimmed());
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("  [c]ontinue, [j]ump <label>, [r]estart, [s]top > ");
        let _ = io::stdout().flush();
        let Some(Ok(line)) = lines.next() else {
            return DialogChoice::Stop;
        };
        match parse_choice(&line, &request.labels) {
            Some(choice) => return choice,
            None => println!("  {} not understood: {}", "✗".red(), line.trim()),
        }
    }
}
