use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

/// Where an entity's bytes come from.
///
/// Sources are immutable once built and can be shared between parses, for
/// example by a catalog handing out the same DTD to many documents.
pub trait EntitySource: fmt::Debug {
    fn system_id(&self) -> &str;

    fn public_id(&self) -> Option<&str> {
        None
    }

    /// An encoding name that overrides auto-sensing.
    fn forced_encoding(&self) -> Option<&str> {
        None
    }

    /// Opens a fresh byte stream positioned at the start of the entity.
    fn open(&self) -> io::Result<Box<dyn Read>>;
}

pub type EntitySourceRef = Arc<dyn EntitySource + Send + Sync>;

#[derive(Clone, Debug)]
pub struct FileEntitySource {
    path: PathBuf,
    system_id: String,
    public_id: Option<String>,
    encoding: Option<String>,
}

impl FileEntitySource {
    pub fn new<P: AsRef<Path>>(path: P) -> FileEntitySource {
        let path = path.as_ref().to_path_buf();
        FileEntitySource {
            system_id: path.to_string_lossy().into_owned(),
            path,
            public_id: None,
            encoding: None,
        }
    }

    pub fn with_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntitySource for FileEntitySource {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    fn forced_encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    fn open(&self) -> io::Result<Box<dyn Read>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// An entity held in memory. Cloning shares the buffer.
#[derive(Clone)]
pub struct MemEntitySource {
    system_id: String,
    public_id: Option<String>,
    encoding: Option<String>,
    data: Arc<[u8]>,
}

impl MemEntitySource {
    pub fn new(system_id: impl Into<String>, data: impl Into<Vec<u8>>) -> MemEntitySource {
        MemEntitySource {
            system_id: system_id.into(),
            public_id: None,
            encoding: None,
            data: Arc::from(data.into()),
        }
    }

    pub fn with_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for MemEntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemEntitySource")
            .field("system_id", &self.system_id)
            .field("public_id", &self.public_id)
            .field("len", &self.data.len())
            .finish()
    }
}

impl EntitySource for MemEntitySource {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    fn forced_encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    fn open(&self) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}

/// Resolves `system_id` against the entity that referenced it.
///
/// Absolute ids and URLs are left alone; relative ones are taken from the
/// directory of `parent`.
pub fn resolve_system_id(parent: &str, system_id: &str) -> PathBuf {
    let candidate = system_id.strip_prefix("file://").unwrap_or(system_id);
    let path = Path::new(candidate);
    if path.is_absolute() || parent.is_empty() {
        return path.to_path_buf();
    }
    let parent = parent.strip_prefix("file://").unwrap_or(parent);
    match Path::new(parent).parent() {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}
