//! Voice conversation persistence.
//!
//! One JSON document per conversation under
//! `paseoHome/voice-conversations/<id>.json`. STT/TTS engines are external
//! collaborators; the daemon only stores history.

use std::path::{Path, PathBuf};

use paseo_domain::{Error, Result};
use paseo_protocol::types::VoiceConversation;

pub struct VoiceStore {
    dir: PathBuf,
}

impl VoiceStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn doc_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        {
            return Err(Error::BadRequest(format!("invalid conversation id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    pub fn set(&self, conversation: &VoiceConversation) -> Result<()> {
        let path = self.doc_path(&conversation.id)?;
        let json = serde_json::to_vec_pretty(conversation)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<VoiceConversation>> {
        let path = self.doc_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn list(&self) -> Result<Vec<VoiceConversation>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| {
                    serde_json::from_str::<VoiceConversation>(&raw).map_err(Error::Json)
                }) {
                Ok(doc) => out.push(doc),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed voice conversation");
                }
            }
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.doc_path(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
