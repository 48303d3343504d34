use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const ORIGINAL_URLS: [&str; 4] = [
    "https://huggingface.co/ResembleAI/chatterbox/resolve/main/t3_cfg.safetensors?download=true",
    "https://huggingface.co/ResembleAI/chatterbox/resolve/main/s3gen.safetensors?download=true",
    "https://huggingface.co/ResembleAI/chatterbox/resolve/main/tokenizer.json?download=true",
    "https://huggingface.co/ResembleAI/chatterbox/resolve/main/ve.safetensors?download=true",
];

const TURBO_URLS: [&str; 11] = [
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/s3gen.safetensors?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/conds.pt?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/added_tokens.json?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/s3gen_meanflow.safetensors?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/special_tokens_map.json?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/t3_turbo_v1.safetensors?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/t3_turbo_v1.yaml?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/tokenizer_config.json?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/ve.safetensors?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/vocab.json?download=true",
    "https://huggingface.co/ResembleAI/chatterbox-turbo/resolve/main/merges.txt?download=true",
];

/// The two distributable Chatterbox checkpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
    Original,
    Turbo,
}

impl ModelVariant {
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            ModelVariant::Original => "original",
            ModelVariant::Turbo => "turbo",
        }
    }

    /// Total on-disk footprint of the variant's asset files.
    #[must_use]
    pub fn expected_size_bytes(self) -> u64 {
        match self {
            ModelVariant::Original => 9_060_000_000,
            ModelVariant::Turbo => 4_060_000_000,
        }
    }

    /// Ordered file descriptors, one per remote asset.
    #[must_use]
    pub fn asset_files(self) -> Vec<AssetFile> {
        let urls: &[&str] = match self {
            ModelVariant::Original => &ORIGINAL_URLS,
            ModelVariant::Turbo => &TURBO_URLS,
        };
        urls.iter()
            .map(|url| AssetFile {
                relative_path: filename_from_url(url),
                remote_url: (*url).to_string(),
                expected_checksum: None,
            })
            .collect()
    }

    /// File names a user-supplied model folder must contain.
    #[must_use]
    pub fn expected_file_names(self) -> Vec<String> {
        self.asset_files()
            .into_iter()
            .map(|file| file.relative_path)
            .collect()
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "original" => Ok(ModelVariant::Original),
            "turbo" => Ok(ModelVariant::Turbo),
            other => Err(format!("unknown model variant: {other}")),
        }
    }
}

/// One downloadable model file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    /// Destination path relative to the variant's model directory.
    pub relative_path: String,
    pub remote_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_checksum: Option<String>,
}

fn filename_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|segment| segment.split(['?', '#']).next())
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_strip_query_strings() {
        assert_eq!(
            filename_from_url(
                "https://huggingface.co/ResembleAI/chatterbox/resolve/main/ve.safetensors?download=true"
            ),
            "ve.safetensors"
        );
    }

    #[test]
    fn original_variant_lists_four_files() {
        let files = ModelVariant::Original.asset_files();
        assert_eq!(files.len(), 4);
        assert_eq!(files[0].relative_path, "t3_cfg.safetensors");
    }

    #[test]
    fn turbo_variant_lists_eleven_files() {
        let names = ModelVariant::Turbo.expected_file_names();
        assert_eq!(names.len(), 11);
        assert!(names.contains(&"t3_turbo_v1.safetensors".to_string()));
        assert!(names.contains(&"merges.txt".to_string()));
    }

    #[test]
    fn variants_parse_from_cli_strings() {
        assert_eq!("turbo".parse::<ModelVariant>(), Ok(ModelVariant::Turbo));
        assert_eq!(
            "Original".parse::<ModelVariant>(),
            Ok(ModelVariant::Original)
        );
        assert!("large".parse::<ModelVariant>().is_err());
    }
}
