//! Reads the identifying header of arcdps combat recordings.
//!
//! A recording starts with the magic `EVTC`, an eight character build date,
//! a one byte revision and the little-endian trigger id of the encounter.
//! `.zevtc` files are zip archives wrapping that same stream.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub const EVTC_EXTENSION: &str = "evtc";
pub const ZEVTC_EXTENSION: &str = "zevtc";
pub const UNDEFINED_ENCOUNTER_NAME: &str = "Undefined";

const EVTC_MAGIC: &[u8; 4] = b"EVTC";
const HEADER_LENGTH: usize = 16;

pub type TriggerId = u16;

#[derive(Debug, thiserror::Error)]
pub enum EvtcError {
    #[error("failed to open recording '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read recording header: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to open compressed recording: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("compressed recording contains no entries")]
    EmptyArchive,
    #[error("recording is truncated ({0} header bytes)")]
    Truncated(usize),
    #[error("recording does not start with the EVTC magic")]
    BadMagic,
    #[error("unsupported recording extension: {0}")]
    UnsupportedExtension(String),
}

/// Identifying data extracted from a raw recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtcData {
    pub evtc_file_path: PathBuf,
    pub time: DateTime<Utc>,
    pub build_date: String,
    pub revision: u8,
    pub trigger_id: TriggerId,
}

impl EvtcData {
    /// Trigger id zero marks recordings arcdps could not attribute to an encounter.
    pub fn is_valid(&self) -> bool {
        self.trigger_id != 0
    }

    pub fn encounter_name(&self) -> &'static str {
        encounter_name(self.trigger_id).unwrap_or(UNDEFINED_ENCOUNTER_NAME)
    }
}

pub fn is_recording_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension == EVTC_EXTENSION || extension == ZEVTC_EXTENSION)
        .unwrap_or(false)
}

pub fn parse(evtc_file_path: &Path) -> Result<EvtcData, EvtcError> {
    let file = File::open(evtc_file_path).map_err(|source| EvtcError::Open {
        path: evtc_file_path.to_path_buf(),
        source,
    })?;

    let time = file
        .metadata()
        .and_then(|metadata| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let extension = evtc_file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default();

    let header = match extension {
        ZEVTC_EXTENSION => {
            let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
            if archive.is_empty() {
                return Err(EvtcError::EmptyArchive);
            }
            let entry = archive.by_index(0)?;
            read_header(entry)?
        }
        EVTC_EXTENSION => read_header(BufReader::new(file))?,
        other => return Err(EvtcError::UnsupportedExtension(other.to_string())),
    };

    let (build_date, revision, trigger_id) = parse_header(&header)?;

    Ok(EvtcData {
        evtc_file_path: evtc_file_path.to_path_buf(),
        time,
        build_date,
        revision,
        trigger_id,
    })
}

fn read_header(reader: impl Read) -> Result<Vec<u8>, EvtcError> {
    let mut header = Vec::with_capacity(HEADER_LENGTH);
    reader.take(HEADER_LENGTH as u64).read_to_end(&mut header)?;
    Ok(header)
}

fn parse_header(header: &[u8]) -> Result<(String, u8, TriggerId), EvtcError> {
    if header.len() < HEADER_LENGTH - 1 {
        return Err(EvtcError::Truncated(header.len()));
    }

    if &header[0..4] != EVTC_MAGIC {
        return Err(EvtcError::BadMagic);
    }

    let build_date = String::from_utf8_lossy(&header[4..12]).to_string();
    let revision = header[12];
    let trigger_id = u16::from_le_bytes([header[13], header[14]]);

    Ok((build_date, revision, trigger_id))
}

pub fn encounter_name(trigger_id: TriggerId) -> Option<&'static str> {
    ENCOUNTER_NAMES
        .iter()
        .find(|(id, _)| *id == trigger_id)
        .map(|(_, name)| *name)
}

const ENCOUNTER_NAMES: &[(TriggerId, &str)] = &[
    (1, "World vs. World"),
    // Spirit Vale
    (15438, "Vale Guardian"),
    (15429, "Gorseval"),
    (15415, "Spirit Race"),
    (15375, "Sabetha the Saboteur"),
    // Salvation Pass
    (16123, "Slothasor"),
    (16088, "Bandit Trio"),
    (16115, "Matthias Gabrel"),
    // Stronghold of the Faithful
    (16253, "Siege the Stronghold"),
    (16235, "Keep Construct"),
    (16247, "Twisted Castle"),
    (16246, "Xera"),
    // Bastion of the Penitent
    (17194, "Cairn the Indomitable"),
    (17172, "Mursaat Overseer"),
    (17188, "Samarog"),
    (17154, "Deimos"),
    // Hall of Chains
    (19767, "Soulless Horror"),
    (19828, "River of Souls"),
    (19691, "Statue of Ice"),
    (19844, "Statue of Darkness"),
    (19536, "Statue of Death"),
    (19450, "Dhuum"),
    // Mythwright Gambit
    (43974, "Conjured Amalgamate"),
    (21105, "Twin Largos"),
    (20934, "Qadim"),
    // The Key of Ahdashim
    (22006, "Cardinal Adina"),
    (21964, "Cardinal Sabir"),
    (22000, "Qadim the Peerless"),
    // Mount Balrior
    (26774, "Decima, the Stormsinger"),
    (26725, "Greer, the Blightbringer"),
    (26712, "Ura, the Steamshrieker"),
    // Nightmare
    (17021, "MAMA"),
    (17028, "Siax the Corrupted"),
    (16948, "Ensolyss of the Endless Torment"),
    // Shattered Observatory
    (17632, "Skorvald the Shattered"),
    (17949, "Artsariiv"),
    (17759, "Arkk"),
    // Sunqua Peak
    (23254, "Ai, Keeper of the Peak"),
    // Silent Surf
    (25572, "Kanaxai"),
    (25577, "Kanaxai CM"),
    // Lonely Tower
    (26231, "Eparch"),
    // Strike missions
    (25413, "Old Lion's Court"),
    (25414, "Old Lion's Court CM"),
    (22154, "Icebrood Construct"),
    (22343, "Super Kodan Brothers"),
    (22492, "Fraenir of Jormag"),
    (22521, "Boneskinner"),
    (22711, "Whisper of Jormag"),
    (24033, "Aetherblade Hideout"),
    (23957, "Xunlai Jade Junkyard"),
    (24485, "Kaineng Overlook"),
    (24266, "Kaineng Overlook CM"),
    (43488, "Harvest Temple"),
    (25705, "Cosmic Observatory"),
    (25989, "Temple of Febe"),
    // Convergences
    (26142, "Demon Knight"),
    (26143, "Sorrow"),
    (26161, "Dreadwing"),
    (26146, "Hell Sister"),
    (26196, "Umbriel, Halberd of House Aurkus"),
    // Special Forces Training Area
    (16199, "Standard Kitty Golem"),
    (19645, "Medium Kitty Golem"),
    (19676, "Large Kitty Golem"),
    // Open world
    (35552, "Soo-Won"),
    // Uncategorized
    (21333, "Freezie"),
    (21181, "Dreg Shark"),
    (15884, "Hearts and Minds"),
];

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn build_header(trigger_id: TriggerId) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(b"EVTC");
        header.extend_from_slice(b"20240612");
        header.push(1);
        header.extend_from_slice(&trigger_id.to_le_bytes());
        header.push(0);
        header.extend_from_slice(&[0xAB; 32]);
        header
    }

    pub(crate) fn write_zevtc(path: &Path, trigger_id: TriggerId) {
        let file = File::create(path).expect("create zevtc");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("recording", options).expect("start entry");
        writer
            .write_all(&build_header(trigger_id))
            .expect("write entry");
        writer.finish().expect("finish zevtc");
    }

    #[test]
    fn reads_plain_recording_header() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("20240612-201511.evtc");
        std::fs::write(&path, build_header(19450)).expect("write evtc");

        let data = parse(&path).expect("parse evtc");
        assert_eq!(data.trigger_id, 19450);
        assert_eq!(data.build_date, "20240612");
        assert_eq!(data.revision, 1);
        assert_eq!(data.encounter_name(), "Dhuum");
        assert!(data.is_valid());
    }

    #[test]
    fn reads_compressed_recording_header() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("20240612-201511.zevtc");
        write_zevtc(&path, 22000);

        let data = parse(&path).expect("parse zevtc");
        assert_eq!(data.trigger_id, 22000);
        assert_eq!(data.encounter_name(), "Qadim the Peerless");
    }

    #[test]
    fn unknown_trigger_ids_are_kept_as_undefined() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("unknown.evtc");
        std::fs::write(&path, build_header(4242)).expect("write evtc");

        let data = parse(&path).expect("parse evtc");
        assert!(data.is_valid());
        assert_eq!(data.encounter_name(), UNDEFINED_ENCOUNTER_NAME);
    }

    #[test]
    fn rejects_corrupt_recordings() {
        let directory = tempfile::tempdir().expect("tempdir");

        let garbage = directory.path().join("garbage.evtc");
        std::fs::write(&garbage, b"NOPE20240612\x01\x00\x00\x00").expect("write");
        assert!(matches!(parse(&garbage), Err(EvtcError::BadMagic)));

        let short = directory.path().join("short.evtc");
        std::fs::write(&short, b"EVTC").expect("write");
        assert!(matches!(parse(&short), Err(EvtcError::Truncated(4))));

        let broken_zip = directory.path().join("broken.zevtc");
        std::fs::write(&broken_zip, b"definitely not a zip").expect("write");
        assert!(matches!(parse(&broken_zip), Err(EvtcError::Archive(_))));
    }

    #[test]
    fn recognizes_recording_extensions() {
        assert!(is_recording_file(Path::new("a/b/1.zevtc")));
        assert!(is_recording_file(Path::new("1.evtc")));
        assert!(!is_recording_file(Path::new("1.evtc.tmp")));
        assert!(!is_recording_file(Path::new("1.json")));
    }
}
