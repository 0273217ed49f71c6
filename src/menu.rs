//! Interactive instance menu
//!
//! The loop owns an explicit [`Screen`]; each step consumes the current
//! screen and returns the next one, so no selection lives in globals.

use anyhow::Result;
use inquire::error::InquireError;
use inquire::{Confirm, Select};

use crate::app::App;
use crate::multipass::{Instance, InstanceCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Main,
    Commands(Instance),
    Exit,
}

/// What the user picked on the main screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainChoice {
    Instance(usize),
    New,
    Purge,
    Exit,
}

/// Operations the menu drives
pub trait Backend {
    fn prepare(&self) -> Result<()>;
    fn list(&self) -> Result<Vec<Instance>>;
    fn create(&self) -> Result<Option<Instance>>;
    fn purge(&self) -> Result<String>;
    fn execute(&self, command: InstanceCommand, instance: &Instance) -> Result<String>;
}

impl Backend for App {
    fn prepare(&self) -> Result<()> {
        App::prepare(self)
    }

    fn list(&self) -> Result<Vec<Instance>> {
        App::list(self)
    }

    fn create(&self) -> Result<Option<Instance>> {
        self.create_instance()
    }

    fn purge(&self) -> Result<String> {
        App::purge(self)
    }

    fn execute(&self, command: InstanceCommand, instance: &Instance) -> Result<String> {
        App::execute(self, command, instance)
    }
}

/// User interaction; `None` from a choice means "go back"
pub trait Prompter {
    fn main_choice(&mut self, instances: &[Instance]) -> Result<MainChoice>;
    fn command_choice(&mut self, instance: &Instance, commands: &[InstanceCommand]) -> Result<Option<InstanceCommand>>;
    fn show(&mut self, text: &str);
    fn pause(&mut self, message: &str) -> Result<()>;
}

pub struct Menu<'a, B: Backend, P: Prompter> {
    backend: &'a B,
    prompter: P,
}

impl<'a, B: Backend, P: Prompter> Menu<'a, B, P> {
    pub fn new(backend: &'a B, prompter: P) -> Self {
        Self { backend, prompter }
    }

    pub fn run(mut self) -> Result<()> {
        let mut screen = Screen::Main;
        while screen != Screen::Exit {
            screen = self.step(screen)?;
        }
        Ok(())
    }

    pub fn step(&mut self, screen: Screen) -> Result<Screen> {
        match screen {
            Screen::Main => self.main_screen(),
            Screen::Commands(instance) => self.commands_screen(instance),
            Screen::Exit => Ok(Screen::Exit),
        }
    }

    fn main_screen(&mut self) -> Result<Screen> {
        self.backend.prepare()?;

        let mut instances = self.backend.list()?;
        if instances.is_empty() {
            self.prompter.show("No instances found, creating one...");
            if let Some(created) = self.backend.create()? {
                instances.push(created);
            }
        }

        let selected = match self.prompter.main_choice(&instances)? {
            MainChoice::Exit => return Ok(Screen::Exit),
            MainChoice::Purge => {
                let output = self.backend.purge()?;
                self.prompter.show(&output);
                return Ok(Screen::Main);
            }
            MainChoice::New => match self.backend.create()? {
                Some(created) => created,
                None => {
                    self.prompter.pause("The new instance did not show up in the list")?;
                    return Ok(Screen::Main);
                }
            },
            MainChoice::Instance(index) => match instances.get(index) {
                Some(instance) => instance.clone(),
                None => return Ok(Screen::Main),
            },
        };

        if InstanceCommand::for_state(selected.state).is_empty() {
            self.prompter.pause(&format!(
                "No commands available for {} while it is {}",
                selected.name, selected.state
            ))?;
            return Ok(Screen::Main);
        }
        Ok(Screen::Commands(selected))
    }

    fn commands_screen(&mut self, instance: Instance) -> Result<Screen> {
        let commands = InstanceCommand::for_state(instance.state);
        let Some(command) = self.prompter.command_choice(&instance, commands)? else {
            return Ok(Screen::Main);
        };

        let output = match self.backend.execute(command, &instance) {
            Ok(output) => output,
            Err(e) => {
                self.prompter
                    .pause(&format!("{} {} failed: {e:#}", command.verb(), instance.name))?;
                return Ok(Screen::Commands(instance));
            }
        };
        if !output.is_empty() {
            self.prompter.show(&output);
        }

        if command.changes_state() {
            Ok(Screen::Main)
        } else {
            Ok(Screen::Commands(instance))
        }
    }
}

/// Terminal prompts through inquire
#[derive(Debug, Default)]
pub struct InquirePrompter;

/// Esc and Ctrl-C on a prompt count as "back"
fn cancelled(e: &InquireError) -> bool {
    matches!(e, InquireError::OperationCanceled | InquireError::OperationInterrupted)
}

#[derive(Debug, Clone)]
enum MainOption {
    Instance(usize, String),
    New,
    Purge,
    Exit,
}

impl std::fmt::Display for MainOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance(_, label) => f.write_str(label),
            Self::New => f.write_str("Create a new instance"),
            Self::Purge => f.write_str("Purge all deleted instances"),
            Self::Exit => f.write_str("Exit"),
        }
    }
}

impl Prompter for InquirePrompter {
    fn main_choice(&mut self, instances: &[Instance]) -> Result<MainChoice> {
        let mut options: Vec<MainOption> = instances
            .iter()
            .enumerate()
            .map(|(i, instance)| MainOption::Instance(i, instance.to_string()))
            .collect();
        options.extend([MainOption::New, MainOption::Purge, MainOption::Exit]);

        match Select::new("Select an instance:", options).prompt() {
            Ok(MainOption::Instance(i, _)) => Ok(MainChoice::Instance(i)),
            Ok(MainOption::New) => Ok(MainChoice::New),
            Ok(MainOption::Purge) => Ok(MainChoice::Purge),
            Ok(MainOption::Exit) => Ok(MainChoice::Exit),
            Err(e) if cancelled(&e) => Ok(MainChoice::Exit),
            Err(e) => Err(anyhow::anyhow!("Prompt failed: {e}")),
        }
    }

    fn command_choice(&mut self, instance: &Instance, commands: &[InstanceCommand]) -> Result<Option<InstanceCommand>> {
        let prompt = format!("{} ({}):", instance.name, instance.state);
        match Select::new(&prompt, commands.to_vec())
            .with_help_message("Esc to go back")
            .prompt()
        {
            Ok(command) => Ok(Some(command)),
            Err(e) if cancelled(&e) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Prompt failed: {e}")),
        }
    }

    fn show(&mut self, text: &str) {
        println!("{text}");
        println!();
    }

    fn pause(&mut self, message: &str) -> Result<()> {
        match Confirm::new(message).with_default(true).with_help_message("Enter to continue").prompt() {
            Ok(_) => Ok(()),
            Err(e) if cancelled(&e) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Prompt failed: {e}")),
        }
    }
}
