//! Ordered command store with an editing cursor.

use std::collections::HashMap;
use tracing::debug;

use crate::command::{Command, CommandId, CommandRecord};
use crate::errors::{LabelError, LoadError, SessionError};
use crate::labels::LabelRegistry;
use crate::session::Session;

/// The editable script: execution order plus the commands by id.
///
/// `order` and `commands` always hold the same set of ids. The cursor is the
/// index of the selected line; `None` is the empty line before the first
/// command, so an insert there lands at index 0.
#[derive(Debug, Clone, Default)]
pub struct Program {
    order: Vec<CommandId>,
    commands: HashMap<CommandId, Command>,
    labels: LabelRegistry,
    next_id: u64,
    cursor: Option<usize>,
    clipboard: Vec<Command>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a program from commands in execution order.
    pub fn from_commands<I>(commands: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = Command>,
    {
        let mut program = Program::new();
        for command in commands {
            program.insert(command)?;
        }
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn labels(&self) -> &LabelRegistry {
        &self.labels
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// The program for a manual edit, refused while `session` records or plays.
    pub fn edit(&mut self, session: &Session) -> Result<&mut Self, SessionError> {
        session.ensure_idle()?;
        Ok(self)
    }

    /// Selects a line; out-of-range indices select the last command.
    pub fn set_cursor(&mut self, cursor: Option<usize>) {
        self.cursor = match cursor {
            Some(_) if self.order.is_empty() => None,
            Some(index) => Some(index.min(self.order.len() - 1)),
            None => None,
        };
    }

    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.commands.get(&id)
    }

    pub fn id_at(&self, index: usize) -> Option<CommandId> {
        self.order.get(index).copied()
    }

    pub fn get_at(&self, index: usize) -> Option<&Command> {
        self.id_at(index).and_then(|id| self.commands.get(&id))
    }

    pub fn index_of(&self, id: CommandId) -> Option<usize> {
        self.order.iter().position(|&other| other == id)
    }

    /// Commands in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (CommandId, &Command)> + '_ {
        self.order.iter().filter_map(move |id| self.commands.get(id).map(|c| (*id, c)))
    }

    pub fn commands(&self) -> Vec<Command> {
        self.iter().map(|(_, command)| command.clone()).collect()
    }

    /// Index of every label and block name.
    pub fn label_index(&self) -> HashMap<String, usize> {
        self.iter()
            .enumerate()
            .filter_map(|(index, (_, command))| command.label_name().map(|name| (name.to_string(), index)))
            .collect()
    }

    fn allocate_id(&mut self) -> CommandId {
        self.next_id += 1;
        CommandId(self.next_id)
    }

    /// Inserts after the cursor and moves the cursor onto the new command.
    pub fn insert(&mut self, command: Command) -> Result<CommandId, LabelError> {
        if let Some(name) = command.label_name() {
            self.labels.register(name)?;
        }
        let id = self.allocate_id();
        let index = self.cursor.map_or(0, |cursor| cursor + 1);
        self.order.insert(index, id);
        self.commands.insert(id, command);
        self.cursor = Some(index);
        Ok(id)
    }

    /// Replaces the command under the cursor, keeping its id.
    pub fn replace(&mut self, command: Command) -> Result<Option<CommandId>, LabelError> {
        let Some(id) = self.cursor.and_then(|cursor| self.id_at(cursor)) else {
            return Ok(None);
        };
        let old_name = self.commands.get(&id).and_then(|c| c.label_name()).map(str::to_string);
        let new_name = command.label_name().map(str::to_string);
        if old_name != new_name {
            if let Some(old) = &old_name {
                self.labels.unregister(old);
            }
            if let Some(new) = &new_name {
                if let Err(err) = self.labels.register(new) {
                    if let Some(old) = &old_name {
                        self.labels.register(old)?;
                    }
                    return Err(err);
                }
            }
        }
        self.commands.insert(id, command);
        Ok(Some(id))
    }

    /// Removes commands; the cursor moves to the line before the first removed one.
    pub fn delete(&mut self, ids: &[CommandId]) -> Vec<Command> {
        let first_removed = ids.iter().filter_map(|&id| self.index_of(id)).min();
        let mut removed = Vec::new();
        self.order.retain(|id| !ids.contains(id));
        for id in ids {
            if let Some(command) = self.commands.remove(id) {
                if let Some(name) = command.label_name() {
                    self.labels.unregister(name);
                }
                removed.push(command);
            }
        }
        if let Some(first) = first_removed {
            self.set_cursor(first.checked_sub(1));
        }
        debug!("Deleted {} command(s)", removed.len());
        removed
    }

    pub fn delete_at_cursor(&mut self) -> Option<Command> {
        let id = self.cursor.and_then(|cursor| self.id_at(cursor))?;
        self.delete(&[id]).pop()
    }

    /// Moves one command by `offset` lines, clamped to the program bounds.
    pub fn move_command(&mut self, id: CommandId, offset: isize) -> Option<usize> {
        let from = self.index_of(id)?;
        let last = self.order.len().saturating_sub(1) as isize;
        let to = (from as isize + offset).clamp(0, last) as usize;
        let id = self.order.remove(from);
        self.order.insert(to, id);
        self.cursor = Some(to);
        Some(to)
    }

    pub fn copy(&mut self, ids: &[CommandId]) {
        self.clipboard = self
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(_, command)| command.clone())
            .collect();
    }

    pub fn cut(&mut self, ids: &[CommandId]) -> Vec<Command> {
        self.copy(ids);
        self.delete(ids)
    }

    /// Inserts the clipboard after the cursor. Labels that collide with an
    /// existing name are renamed to the next free `name_N`.
    pub fn paste(&mut self) -> Vec<CommandId> {
        let clipboard = self.clipboard.clone();
        let mut inserted = Vec::with_capacity(clipboard.len());
        for mut command in clipboard {
            if let Some(name) = command.label_name() {
                let free = self.labels.free_name(name);
                if free != name {
                    debug!("Renaming pasted label '{}' to '{}'", name, free);
                    command.rename_label(free);
                }
            }
            match self.insert(command) {
                Ok(id) => inserted.push(id),
                Err(err) => debug!("Skipping pasted command: {}", err),
            }
        }
        inserted
    }

    pub fn clipboard(&self) -> &[Command] {
        &self.clipboard
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.commands.clear();
        self.labels.clear();
        self.cursor = None;
    }

    pub fn to_records(&self) -> Vec<CommandRecord> {
        self.iter().map(|(_, command)| command.to_record()).collect()
    }

    pub fn from_records(records: &[CommandRecord]) -> Result<Self, LoadError> {
        let mut program = Program::new();
        for record in records {
            let command = Command::from_record(record)?;
            program.insert(command).map_err(|err| match err {
                LabelError::AlreadyExists(name) | LabelError::Unknown(name) => {
                    LoadError::DuplicateLabel(name)
                }
            })?;
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Action;
    use crate::session::Mode;

    fn label(name: &str) -> Command {
        Command::new(Action::Label(name.into()))
    }

    fn text(value: &str) -> Command {
        Command::new(Action::WriteText(value.into()))
    }

    #[test]
    fn test_insert_follows_cursor() {
        let mut program = Program::new();
        program.insert(text("a")).unwrap();
        program.insert(text("c")).unwrap();
        program.set_cursor(Some(0));
        program.insert(text("b")).unwrap();
        program.set_cursor(None);
        program.insert(text("start")).unwrap();

        let texts: Vec<String> = program.commands().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            texts,
            vec!["Write text \"start\"", "Write text \"a\"", "Write text \"b\"", "Write text \"c\""]
        );
        assert_eq!(program.cursor(), Some(0));
    }

    #[test]
    fn test_label_uniqueness_enforced_on_insert_and_replace() {
        let mut program = Program::new();
        program.insert(label("A")).unwrap();
        program.insert(label("B")).unwrap();
        assert_eq!(
            program.insert(label("A")),
            Err(LabelError::AlreadyExists("A".into()))
        );
        assert_eq!(program.len(), 2);

        program.set_cursor(Some(1));
        assert!(program.replace(label("A")).is_err());
        assert!(program.labels().contains("B"));
        program.replace(label("C")).unwrap();
        assert!(!program.labels().contains("B"));
        assert!(program.labels().contains("C"));
    }

    #[test]
    fn test_delete_unregisters_labels_and_keeps_map_in_sync() {
        let mut program = Program::new();
        let a = program.insert(label("A")).unwrap();
        let b = program.insert(text("x")).unwrap();
        program.delete(&[a]);
        assert!(!program.labels().contains("A"));
        assert_eq!(program.len(), 1);
        assert!(program.get(a).is_none());
        assert_eq!(program.id_at(0), Some(b));
        program.insert(label("A")).unwrap();
    }

    #[test]
    fn test_delete_moves_cursor_before_first_removed() {
        let mut program = Program::new();
        let _a = program.insert(text("a")).unwrap();
        let b = program.insert(text("b")).unwrap();
        let c = program.insert(text("c")).unwrap();
        program.insert(text("d")).unwrap();
        program.delete(&[c, b]);
        assert_eq!(program.cursor(), Some(0));

        let first = program.id_at(0).unwrap();
        program.delete(&[first]);
        assert_eq!(program.cursor(), None);
    }

    #[test]
    fn test_paste_renames_colliding_labels() {
        let mut program = Program::new();
        let a = program.insert(label("retry")).unwrap();
        let b = program.insert(text("x")).unwrap();
        program.copy(&[a, b]);
        program.paste();
        program.paste();

        let names: Vec<String> = program
            .commands()
            .iter()
            .filter_map(|c| c.label_name().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["retry", "retry_1", "retry_2"]);
        assert_eq!(program.len(), 6);
    }

    #[test]
    fn test_cut_then_paste_keeps_original_name() {
        let mut program = Program::new();
        let a = program.insert(label("end")).unwrap();
        program.insert(text("x")).unwrap();
        program.cut(&[a]);
        assert!(program.labels().is_empty());
        program.set_cursor(Some(0));
        program.paste();
        assert_eq!(program.label_index().get("end"), Some(&1));
    }

    #[test]
    fn test_move_command_clamps() {
        let mut program = Program::new();
        let a = program.insert(text("a")).unwrap();
        program.insert(text("b")).unwrap();
        assert_eq!(program.move_command(a, 5), Some(1));
        assert_eq!(program.index_of(a), Some(1));
        assert_eq!(program.move_command(a, -9), Some(0));
    }

    #[test]
    fn test_duplicate_label_in_records_is_a_load_error() {
        let records = vec![label("A").to_record(), label("A").to_record()];
        let err = Program::from_records(&records).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateLabel(name) if name == "A"));
    }

    #[test]
    fn test_manual_edit_refused_while_recording() {
        let session = Session::new();
        let mut program = Program::from_commands([text("a")]).unwrap();

        let recording = session.begin(Mode::Recording).unwrap();
        assert_eq!(
            program.edit(&session).unwrap_err(),
            SessionError::Busy {
                active: Mode::Recording,
                requested: Mode::Editing
            }
        );
        drop(recording);

        program.edit(&session).unwrap().insert(text("b")).unwrap();
        assert_eq!(program.len(), 2);
    }
}
