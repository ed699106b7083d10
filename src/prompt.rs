// ============================================
// prompt.rs — Interactive selection
// ============================================
//
// Used when the ISO search or the edition list is ambiguous. The user
// picks from a list or cancels (Esc / q); there is no free-text input
// to get wrong, so nothing ever loops.
// ============================================

use anyhow::{anyhow, bail, Result};
use dialoguer::Select;

/// Asks the user to pick one of several items.
pub trait Chooser {
    /// `Ok(Some(i))` is the chosen position in `items`, `Ok(None)` a cancel.
    fn choose(&self, prompt: &str, items: &[String]) -> Result<Option<usize>>;
}

/// Arrow-key list on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalChooser;

impl Chooser for TerminalChooser {
    fn choose(&self, prompt: &str, items: &[String]) -> Result<Option<usize>> {
        Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact_opt()
            .map_err(|e| anyhow!("prompt failed: {e}"))
    }
}

/// Pick one item, treating a cancel as fatal.
/// A single item is returned without asking.
pub fn select_one(chooser: &dyn Chooser, prompt: &str, items: &[String]) -> Result<usize> {
    match items.len() {
        0 => bail!("Nothing to choose from"),
        1 => Ok(0),
        _ => match chooser.choose(prompt, items)? {
            Some(i) if i < items.len() => Ok(i),
            Some(i) => bail!("Selection {} is out of range", i),
            None => bail!("Selection cancelled"),
        },
    }
}
