use anyhow::Result;
use std::path::PathBuf;

/// Persistent viewer settings.
/// If the data structure changes, it should be versioned to maintain compatibility with data saved
/// using older versions of spanview.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum PersistentData {
    V1(PersistentDataV1),
}

impl Default for PersistentData {
    fn default() -> Self {
        PersistentData::V1(PersistentDataV1::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersistentDataV1 {
    pub api_url: Option<String>,
    pub org_slug: Option<String>,
    pub organization_id: Option<String>,
    pub last_opened_file: Option<PathBuf>,
    /// Prompts (by feature name) that the user dismissed or snoozed.
    #[serde(default)]
    pub hidden_prompts: Vec<String>,
}

impl PersistentData {
    pub fn into_latest(self) -> PersistentDataV1 {
        match self {
            PersistentData::V1(data) => data,
        }
    }
}

pub fn save_persistent_data(settings: &PersistentDataV1) -> Result<()> {
    let mut settings = settings.clone();
    settings.hidden_prompts.sort();
    settings.hidden_prompts.dedup();
    write_data(&PersistentData::V1(settings))
}

pub fn load_persistent_data() -> Result<PersistentDataV1> {
    Ok(read_data()?.into_latest())
}

fn write_data(data: &PersistentData) -> Result<()> {
    let persistent_data_file = persistent_data_file_path()?;
    tracing::info!(path = %persistent_data_file.display(), "writing persistent data");

    // Create the directory if it doesn't exist
    std::fs::create_dir_all(persistent_data_folder()?)?;

    // First write the data to a temporary file
    let write_file_path = temporary_write_file_path()?;
    let mut file = std::fs::File::create(&write_file_path)?;
    serde_json::to_writer_pretty(&mut file, &data)?;
    file.sync_all()?;

    // Then move the temporary file to the final location
    // Makes things more robust against crashes
    std::fs::rename(&write_file_path, persistent_data_file)?;

    Ok(())
}

fn read_data() -> Result<PersistentData> {
    let path = persistent_data_file_path()?;
    tracing::info!(path = %path.display(), "reading persistent data");
    if !path.try_exists()? {
        tracing::info!("file not found, using default data");
        return Ok(PersistentData::default());
    }
    let file = std::fs::File::open(&path)?;
    let data: PersistentData = serde_json::from_reader(file)?;
    Ok(data)
}

fn persistent_data_folder() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "spanview", "spanview")
        .ok_or_else(|| anyhow::anyhow!("No home directory, can't store persistent data"))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn persistent_data_file_path() -> Result<PathBuf> {
    Ok(persistent_data_folder()?.join("persistent_data.json"))
}

fn temporary_write_file_path() -> Result<PathBuf> {
    let random_number: u64 = rand::random();
    Ok(persistent_data_folder()?.join(format!("temporary_persistent_data{}.json", random_number)))
}
