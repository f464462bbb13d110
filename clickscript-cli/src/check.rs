use colored::*;
use std::collections::BTreeSet;

use clickscript::{Action, ErrorPolicy, Program, TemplateDir};

/// Structural problems found without running a script.
#[derive(Default, Debug)]
pub struct CheckReport {
    pub commands: usize,
    pub labels: Vec<String>,
    pub fields: BTreeSet<String>,
    pub templates: BTreeSet<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CheckReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn display(&self) {
        println!();
        println!("{}", "═".repeat(60));
        println!("{}", "SCRIPT CHECK".bold());
        println!("{}", "═".repeat(60));

        let status = if self.errors.is_empty() {
            if self.warnings.is_empty() {
                "✅ VALID".green().bold()
            } else {
                "⚠️  VALID WITH WARNINGS".yellow().bold()
            }
        } else {
            "❌ INVALID".red().bold()
        };
        println!("\nStatus: {status}");
        println!("{}", "─".repeat(60));

        println!("\n  Commands:  {}", self.commands);
        println!("  Labels:    {}", list(self.labels.iter()));
        println!("  Fields:    {}", list(self.fields.iter()));
        println!("  Templates: {}", list(self.templates.iter()));

        if !self.errors.is_empty() {
            println!("\n{}", "Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }
        if !self.warnings.is_empty() {
            println!("\n{}", "Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }
        println!("\n{}", "═".repeat(60));
        println!();
    }
}

fn list<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let items: Vec<&str> = items.map(String::as_str).collect();
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

pub fn check_program(program: &Program, templates: &TemplateDir) -> CheckReport {
    let labels = program.label_index();
    let saved: BTreeSet<String> = templates.names().into_iter().collect();
    let mut report = CheckReport {
        commands: program.len(),
        labels: program.labels().names().map(str::to_string).collect(),
        ..CheckReport::default()
    };
    let mut open_block: Option<(String, usize)> = None;
    let mut open_loops = 0usize;

    for (index, command) in program.commands().iter().enumerate() {
        match &command.action {
            Action::BlockStart(name) => match &open_block {
                Some((outer, start)) => report.errors.push(format!(
                    "Block '{name}' at #{index} is nested inside block '{outer}' at #{start}"
                )),
                None => open_block = Some((name.clone(), index)),
            },
            Action::BlockEnd => {
                if open_block.take().is_none() {
                    report.warnings.push(format!("Block end at #{index} closes no block"));
                }
            }
            Action::LoopStart(_) => open_loops += 1,
            Action::FieldLoopStart(field) => {
                open_loops += 1;
                report.fields.insert(field.clone());
            }
            Action::LoopEnd => {
                if open_loops == 0 {
                    report.warnings.push(format!("Loop end at #{index} closes no loop"));
                } else {
                    open_loops -= 1;
                }
            }
            Action::FieldNext(field) | Action::FieldRead(field) => {
                report.fields.insert(field.clone());
            }
            Action::RunTo(label) | Action::ErrorPolicySet(_, ErrorPolicy::JumpToLabel(label)) => {
                if !labels.contains_key(label) {
                    report
                        .errors
                        .push(format!("Command #{index} jumps to unknown label '{label}'"));
                }
            }
            Action::Click(_, target) => {
                if let Some(template) = &target.template {
                    if !saved.contains(template) {
                        report
                            .warnings
                            .push(format!("Command #{index} uses missing template {template}"));
                    }
                    report.templates.insert(template.clone());
                }
            }
            _ => {}
        }
    }

    if let Some((name, start)) = open_block {
        report
            .errors
            .push(format!("Block '{name}' at #{start} has no block end"));
    }
    if open_loops > 0 {
        report
            .warnings
            .push(format!("{open_loops} loop(s) are never closed"));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use clickscript::{ClickButton, ClickTarget, Command};

    fn program(actions: Vec<Action>) -> Program {
        Program::from_commands(actions.into_iter().map(Command::new)).unwrap()
    }

    #[test]
    fn test_well_formed_script() {
        let dir = tempfile::tempdir().unwrap();
        let report = check_program(
            &program(vec![
                Action::RunTo("fill".into()),
                Action::Stop,
                Action::BlockStart("fill".into()),
                Action::FieldLoopStart("name".into()),
                Action::FieldRead("name".into()),
                Action::FieldNext("name".into()),
                Action::LoopEnd,
                Action::BlockEnd,
            ]),
            &TemplateDir::new(dir.path()),
        );
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
        assert_eq!(report.labels, vec!["fill"]);
        assert_eq!(report.fields.len(), 1);
    }

    #[test]
    fn test_structural_problems() {
        let dir = tempfile::tempdir().unwrap();
        let report = check_program(
            &program(vec![
                Action::BlockStart("outer".into()),
                Action::BlockStart("inner".into()),
                Action::BlockEnd,
                Action::LoopEnd,
                Action::RunTo("missing".into()),
                Action::Click(ClickButton::Left, ClickTarget::at(1, 1).with_template("ok.png")),
                Action::BlockStart("open".into()),
            ]),
            &TemplateDir::new(dir.path()),
        );
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].contains("nested"));
        assert!(report.errors[1].contains("unknown label 'missing'"));
        assert!(report.errors[2].contains("'open'"));
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("ok.png")));
    }
}
