use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::Path;

use log::{debug, info, warn};
use msicore::data::spot::leading_spot_name;

use crate::data::handle::MsiDataHandle;
use crate::error::{DataError, Result};

/// Source of operator answers for the last resolution step.
pub trait Prompt {
    /// Ask a question, `None` when the operator gives up.
    fn ask(&mut self, question: &str) -> Option<String>;
}

impl<P: Prompt + ?Sized> Prompt for &mut P {
    fn ask(&mut self, question: &str) -> Option<String> {
        (**self).ask(question)
    }
}

/// Reads answers from standard input; an empty line gives up.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> Option<String> {
        print!("{}: ", question);
        io::stdout().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let answer = line.trim();
                (!answer.is_empty()).then(|| answer.to_string())
            }
        }
    }
}

/// Never answers; resolution stops after the non-interactive strategies.
pub struct NoPrompt;

impl Prompt for NoPrompt {
    fn ask(&mut self, _question: &str) -> Option<String> {
        None
    }
}

/// Answers from a fixed list, in order.
pub struct ScriptedPrompt {
    answers: std::vec::IntoIter<String>,
}

impl ScriptedPrompt {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        let answers: Vec<String> = answers.into_iter().map(Into::into).collect();
        ScriptedPrompt { answers: answers.into_iter() }
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&mut self, _question: &str) -> Option<String> {
        self.answers.next()
    }
}

/// Ways of finding the spectrum file an exported source belongs to, in the order tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// file stem equals a `spec_file_name`
    ExactMatch,
    /// first and last spot of the export equal a spectrum's spot range
    SpotRangeMatch,
    /// file name is the unique `export_da_name` alias of a spectrum
    AliasMatch,
    /// operator types the name
    InteractivePrompt,
}

impl Strategy {
    pub const CHAIN: [Strategy; 4] = [
        Strategy::ExactMatch,
        Strategy::SpotRangeMatch,
        Strategy::AliasMatch,
        Strategy::InteractivePrompt,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::ExactMatch => "exact match",
            Strategy::SpotRangeMatch => "spot range match",
            Strategy::AliasMatch => "alias match",
            Strategy::InteractivePrompt => "interactive prompt",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub spec_file_name: String,
    pub strategy: Strategy,
}

/// First and last spot name found at the start of a line of the exported text.
pub fn spot_range_of_text(text: &str) -> Option<(String, String)> {
    let first = text.lines().find_map(leading_spot_name)?;
    let last = text.lines().rev().find_map(leading_spot_name)?;
    Some((first, last))
}

/// Resolves exported sources to the spectrum files stored in the database.
pub struct Resolver<'a, P: Prompt> {
    handle: &'a mut MsiDataHandle,
    prompt: P,
}

impl<'a, P: Prompt> Resolver<'a, P> {
    pub fn new(handle: &'a mut MsiDataHandle, prompt: P) -> Self {
        Resolver { handle, prompt }
    }

    /// Resolve a source path to its `spec_file_name`.
    ///
    /// # Arguments
    ///
    /// * `path` - exported source file, read again for its spot range
    ///
    /// # Returns
    ///
    /// * the name and the strategy that found it, or `Unresolved` when every strategy fails
    ///
    pub fn resolve(&mut self, path: &Path) -> Result<Resolution> {
        for strategy in Strategy::CHAIN {
            if let Some(spec_file_name) = self.try_strategy(strategy, path)? {
                info!("{} resolved to {} by {}", path.display(), spec_file_name, strategy);
                return Ok(Resolution { spec_file_name, strategy });
            }
            debug!("{}: {} found nothing", path.display(), strategy);
        }
        Err(DataError::Unresolved(path.to_path_buf()))
    }

    fn try_strategy(&mut self, strategy: Strategy, path: &Path) -> Result<Option<String>> {
        match strategy {
            Strategy::ExactMatch => self.exact_match(path),
            Strategy::SpotRangeMatch => self.spot_range_match(path),
            Strategy::AliasMatch => self.alias_match(path),
            Strategy::InteractivePrompt => self.interactive_prompt(path),
        }
    }

    fn exact_match(&self, path: &Path) -> Result<Option<String>> {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        let ids = self.handle.spec_ids_by_file_name(stem)?;
        Ok((!ids.is_empty()).then(|| stem.to_string()))
    }

    fn spot_range_match(&mut self, path: &Path) -> Result<Option<String>> {
        let text = std::fs::read_to_string(path)?;
        let Some((first, last)) = spot_range_of_text(&text) else {
            return Ok(None);
        };
        self.handle.ensure_spot_range_columns()?;
        Ok(self.handle.spec_file_name_by_spot_range(&first, &last)?)
    }

    fn alias_match(&self, path: &Path) -> Result<Option<String>> {
        let Some(file_name) = file_name_of(path) else {
            return Ok(None);
        };
        let mut names = self.handle.spec_file_names_by_export_name(&file_name)?;
        Ok(if names.len() == 1 { names.pop() } else { None })
    }

    fn interactive_prompt(&mut self, path: &Path) -> Result<Option<String>> {
        let Some(file_name) = file_name_of(path) else {
            return Ok(None);
        };
        let question = format!("spectrum file name for {}", file_name);
        while let Some(answer) = self.prompt.ask(&question) {
            if self.handle.spec_ids_by_file_name(&answer)?.len() == 1 {
                self.handle.set_export_name(&answer, &file_name)?;
                return Ok(Some(answer));
            }
            warn!("{} does not exist in the database or is not unique", answer);
        }
        Ok(None)
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().and_then(|s| s.to_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::meta::MetadataRow;
    use std::fs;

    fn handle() -> MsiDataHandle {
        let handle = MsiDataHandle::in_memory().unwrap();
        handle.create_metadata_table().unwrap();
        for (spec_id, name, spots) in [
            (1, "core_a", "s_R00X1Y1,s_R00X2Y1,s_R00X3Y1"),
            (2, "core_b", "s_R00X1Y5,s_R00X9Y5"),
        ] {
            handle
                .insert_metadata(&MetadataRow {
                    spec_id,
                    spec_file_name: name.to_string(),
                    msi_img_file_name: format!("{}.tif", name),
                    px_rect: "(0, 0, 10, 10)".to_string(),
                    msi_rect: "(0, 0, 10, 10)".to_string(),
                    spot_name: spots.to_string(),
                    tic: "[1, 1, 1]".to_string(),
                    maxpeak: None,
                    rt: None,
                })
                .unwrap();
        }
        handle
    }

    #[test]
    fn test_spot_range_of_text() {
        let text = "spot_name,int_a\nR00X1Y5,1\nR00X4Y5,2\nR00X9Y5,3\n";
        assert_eq!(
            spot_range_of_text(text),
            Some(("R00X1Y5".to_string(), "R00X9Y5".to_string()))
        );
        assert_eq!(spot_range_of_text("spot_name\n"), None);
    }

    #[test]
    fn test_resolution_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = handle();

        let exact = dir.path().join("core_a.csv");
        fs::write(&exact, "spot_name\nR00X7Y7\n").unwrap();
        let by_range = dir.path().join("export_1.csv");
        fs::write(&by_range, "spot_name\nR00X1Y5\nR00X9Y5\n").unwrap();
        let by_prompt = dir.path().join("export_2.csv");
        fs::write(&by_prompt, "spot_name\nR00X7Y7\n").unwrap();

        let mut resolver = Resolver::new(&mut handle, ScriptedPrompt::new(["nope", "core_a"]));
        let found = resolver.resolve(&exact).unwrap();
        assert_eq!(found.strategy, Strategy::ExactMatch);
        assert_eq!(found.spec_file_name, "core_a");

        let found = resolver.resolve(&by_range).unwrap();
        assert_eq!(found.strategy, Strategy::SpotRangeMatch);
        assert_eq!(found.spec_file_name, "core_b");

        let found = resolver.resolve(&by_prompt).unwrap();
        assert_eq!(found.strategy, Strategy::InteractivePrompt);
        assert_eq!(found.spec_file_name, "core_a");

        // the confirmed answer is remembered as an alias
        let mut resolver = Resolver::new(&mut handle, NoPrompt);
        let found = resolver.resolve(&by_prompt).unwrap();
        assert_eq!(found.strategy, Strategy::AliasMatch);
        assert_eq!(found.spec_file_name, "core_a");
    }

    #[test]
    fn test_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unknown.csv");
        fs::write(&path, "spot_name\nR00X7Y7\n").unwrap();
        let mut handle = handle();
        let mut resolver = Resolver::new(&mut handle, NoPrompt);
        assert!(matches!(resolver.resolve(&path), Err(DataError::Unresolved(_))));
    }
}
