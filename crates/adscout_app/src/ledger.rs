use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use adscout_engine::{LedgerError, ScoutStorage, UrlLoader};
use adscout_logging::{scout_debug, scout_info};

/// Known offer URLs, one per line in a plain text file.
///
/// The file is read once when the ledger opens and every newly accepted URL is
/// appended and flushed before `register_offer_url` returns. Edits made to the
/// file by other processes are only seen after [`FileOfferLedger::reload`].
pub struct FileOfferLedger {
    loader: UrlLoader,
    path: PathBuf,
    state: Mutex<LedgerState>,
}

struct LedgerState {
    known: HashSet<String>,
    file: File,
}

impl FileOfferLedger {
    pub fn open(path: impl Into<PathBuf>, loader: UrlLoader) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let known = read_known(&path)?;
        let file = append_handle(&path)?;
        scout_info!("Offer ledger {:?} knows {} offers", path, known.len());
        Ok(Self {
            loader,
            path,
            state: Mutex::new(LedgerState { known, file }),
        })
    }

    /// Replaces the in-memory set with the file contents; returns the new size.
    pub fn reload(&self) -> Result<usize, LedgerError> {
        let known = read_known(&self.path)?;
        let file = append_handle(&self.path)?;
        let mut state = self.state();
        state.known = known;
        state.file = file;
        scout_debug!("Reloaded {} offers from {:?}", state.known.len(), self.path);
        Ok(state.known.len())
    }

    pub fn len(&self) -> usize {
        self.state().known.len()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ScoutStorage for FileOfferLedger {
    fn loader(&self) -> &UrlLoader {
        &self.loader
    }

    fn register_offer_url(&self, url: &str) -> Result<bool, LedgerError> {
        let url = url.trim();
        let mut state = self.state();
        if state.known.contains(url) {
            return Ok(false);
        }
        writeln!(state.file, "{url}")?;
        state.file.flush()?;
        state.known.insert(url.to_string());
        Ok(true)
    }
}

fn read_known(path: &Path) -> Result<HashSet<String>, LedgerError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(err) => Err(err.into()),
    }
}

fn append_handle(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use adscout_engine::{FsResourceStore, ReqwestFetcher, SystemClock};
    use tempfile::TempDir;

    use super::*;

    fn loader(temp: &TempDir) -> UrlLoader {
        let store = FsResourceStore::open(temp.path().join("cache")).unwrap();
        UrlLoader::new(
            Arc::new(store),
            Arc::new(ReqwestFetcher::new(Default::default()).unwrap()),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn new_urls_are_accepted_once_and_persisted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("offers.txt");
        let ledger = FileOfferLedger::open(&path, loader(&temp)).unwrap();

        assert!(ledger.register_offer_url("https://ads.example.pl/o/1").unwrap());
        assert!(ledger.register_offer_url("https://ads.example.pl/o/2").unwrap());
        assert!(!ledger.register_offer_url("https://ads.example.pl/o/1").unwrap());
        assert_eq!(ledger.len(), 2);

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "https://ads.example.pl/o/1\nhttps://ads.example.pl/o/2\n"
        );
    }

    #[test]
    fn reopening_remembers_known_urls() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data").join("offers.txt");
        {
            let ledger = FileOfferLedger::open(&path, loader(&temp)).unwrap();
            ledger.register_offer_url("https://ads.example.pl/o/1").unwrap();
        }
        let ledger = FileOfferLedger::open(&path, loader(&temp)).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.register_offer_url("https://ads.example.pl/o/1").unwrap());
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("offers.txt");
        let ledger = FileOfferLedger::open(&path, loader(&temp)).unwrap();
        ledger.register_offer_url("https://ads.example.pl/o/1").unwrap();

        fs::write(&path, "https://ads.example.pl/o/9\n\n").unwrap();
        assert!(!ledger.register_offer_url("https://ads.example.pl/o/1").unwrap());

        assert_eq!(ledger.reload().unwrap(), 1);
        assert!(!ledger.register_offer_url("https://ads.example.pl/o/9").unwrap());
        assert!(ledger.register_offer_url("https://ads.example.pl/o/1").unwrap());
        assert_eq!(ledger.len(), 2);
    }
}
