//! Library models
//!
//! Favorites are a closed sum type over the five content kinds; bookmarks
//! are verse positions keyed by `surah:ayah`. Both carry an optional
//! backend document id once they have been synced.

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Number of surahs in the mushaf
pub const SURAH_COUNT: u16 = 114;

/// Discriminant of a favorite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteKind {
    Ayah,
    Hadith,
    Supplication,
    Sheikh,
    Recitation,
}

impl FavoriteKind {
    pub const ALL: [FavoriteKind; 5] = [
        FavoriteKind::Ayah,
        FavoriteKind::Hadith,
        FavoriteKind::Supplication,
        FavoriteKind::Sheikh,
        FavoriteKind::Recitation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FavoriteKind::Ayah => "ayah",
            FavoriteKind::Hadith => "hadith",
            FavoriteKind::Supplication => "supplication",
            FavoriteKind::Sheikh => "sheikh",
            FavoriteKind::Recitation => "recitation",
        }
    }
}

impl fmt::Display for FavoriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FavoriteKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        FavoriteKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::InvalidKey(format!("unknown favorite type: {}", s)))
    }
}

/// Identity of a favorite: `(type, id)`, rendered as `type:id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FavoriteKey {
    pub kind: FavoriteKind,
    pub id: String,
}

impl FavoriteKey {
    pub fn new(kind: FavoriteKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for FavoriteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for FavoriteKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        // Ayah ids contain a colon themselves, so split on the first one only
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| AppError::InvalidKey(s.to_string()))?;
        if id.is_empty() {
            return Err(AppError::InvalidKey(s.to_string()));
        }
        Ok(Self::new(kind.parse()?, id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AyahFavorite {
    pub surah: u16,
    pub ayah: u16,
    pub surah_name: String,
    pub text: String,
    #[serde(default)]
    pub translation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HadithFavorite {
    pub id: String,
    pub collection: String,
    pub text: String,
    #[serde(default)]
    pub narrator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplicationFavorite {
    pub id: String,
    /// dua-dhikr category slug
    pub category: String,
    pub title: String,
    pub arabic: String,
    #[serde(default)]
    pub translation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheikhFavorite {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecitationFavorite {
    pub id: String,
    pub sheikh_id: String,
    pub title: String,
    pub audio_url: String,
}

/// Content a user can favorite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FavoriteItem {
    Ayah(AyahFavorite),
    Hadith(HadithFavorite),
    Supplication(SupplicationFavorite),
    Sheikh(SheikhFavorite),
    Recitation(RecitationFavorite),
}

impl FavoriteItem {
    pub fn kind(&self) -> FavoriteKind {
        match self {
            FavoriteItem::Ayah(_) => FavoriteKind::Ayah,
            FavoriteItem::Hadith(_) => FavoriteKind::Hadith,
            FavoriteItem::Supplication(_) => FavoriteKind::Supplication,
            FavoriteItem::Sheikh(_) => FavoriteKind::Sheikh,
            FavoriteItem::Recitation(_) => FavoriteKind::Recitation,
        }
    }

    /// Type-specific identifier
    pub fn id(&self) -> String {
        match self {
            FavoriteItem::Ayah(a) => format!("{}:{}", a.surah, a.ayah),
            FavoriteItem::Hadith(h) => h.id.clone(),
            FavoriteItem::Supplication(s) => s.id.clone(),
            FavoriteItem::Sheikh(s) => s.id.clone(),
            FavoriteItem::Recitation(r) => r.id.clone(),
        }
    }

    pub fn key(&self) -> FavoriteKey {
        FavoriteKey::new(self.kind(), self.id())
    }
}

/// A favorite as stored locally or remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub item: FavoriteItem,
    pub created_at: DateTime<Utc>,
    /// Backend document id, set once the favorite exists remotely
    pub document_id: Option<String>,
}

impl Favorite {
    pub fn new(item: FavoriteItem) -> Self {
        Self {
            item,
            created_at: Utc::now(),
            document_id: None,
        }
    }

    pub fn key(&self) -> FavoriteKey {
        self.item.key()
    }
}

/// Identity of a bookmark, rendered as `surah:ayah`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookmarkKey {
    pub surah: u16,
    pub ayah: u16,
}

impl BookmarkKey {
    pub fn new(surah: u16, ayah: u16) -> Result<Self> {
        if surah == 0 || surah > SURAH_COUNT || ayah == 0 {
            return Err(AppError::InvalidKey(format!("{}:{}", surah, ayah)));
        }
        Ok(Self { surah, ayah })
    }
}

impl fmt::Display for BookmarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.surah, self.ayah)
    }
}

impl FromStr for BookmarkKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AppError::InvalidKey(s.to_string());
        let (surah, ayah) = s.trim().split_once(':').ok_or_else(invalid)?;
        let surah = surah.parse().map_err(|_| invalid())?;
        let ayah = ayah.parse().map_err(|_| invalid())?;
        Self::new(surah, ayah)
    }
}

/// A bookmarked verse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub surah: u16,
    pub ayah: u16,
    pub surah_name: String,
    pub ayah_text: String,
    pub note: Option<String>,
    /// Blob hash of an attached image
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub document_id: Option<String>,
}

impl Bookmark {
    pub fn key(&self) -> BookmarkKey {
        BookmarkKey {
            surah: self.surah,
            ayah: self.ayah,
        }
    }
}

/// Create bookmark request
#[derive(Debug, Clone, Deserialize)]
pub struct NewBookmark {
    pub surah: u16,
    pub ayah: u16,
    pub surah_name: String,
    pub ayah_text: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewBookmark {
    pub fn into_bookmark(self) -> Result<Bookmark> {
        let key = BookmarkKey::new(self.surah, self.ayah)?;
        Ok(Bookmark {
            surah: key.surah,
            ayah: key.ayah,
            surah_name: self.surah_name,
            ayah_text: self.ayah_text,
            note: normalize_note(self.note),
            image_ref: None,
            created_at: Utc::now(),
            document_id: None,
        })
    }
}

/// Treat blank notes as absent
pub fn normalize_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// Favorite row in the local store
#[derive(Debug, Clone, FromRow)]
pub struct FavoriteRow {
    pub identity: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub document_id: Option<String>,
    pub position: i64,
}

impl TryFrom<FavoriteRow> for Favorite {
    type Error = AppError;

    fn try_from(row: FavoriteRow) -> Result<Self> {
        let item: FavoriteItem = serde_json::from_str(&row.payload)?;
        if item.key().to_string() != row.identity {
            return Err(AppError::Generic(format!(
                "favorite payload does not match identity {}",
                row.identity
            )));
        }
        Ok(Favorite {
            item,
            created_at: row.created_at,
            document_id: row.document_id,
        })
    }
}

/// Bookmark row in the local store
#[derive(Debug, Clone, FromRow)]
pub struct BookmarkRow {
    pub key: String,
    pub surah: i64,
    pub ayah: i64,
    pub surah_name: String,
    pub ayah_text: String,
    pub note: Option<String>,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub document_id: Option<String>,
    pub position: i64,
}

impl TryFrom<BookmarkRow> for Bookmark {
    type Error = AppError;

    fn try_from(row: BookmarkRow) -> Result<Self> {
        let surah = u16::try_from(row.surah).map_err(|_| AppError::InvalidKey(row.key.clone()))?;
        let ayah = u16::try_from(row.ayah).map_err(|_| AppError::InvalidKey(row.key.clone()))?;
        Ok(Bookmark {
            surah,
            ayah,
            surah_name: row.surah_name,
            ayah_text: row.ayah_text,
            note: row.note,
            image_ref: row.image_ref,
            created_at: row.created_at,
            document_id: row.document_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ayah_identity_keeps_inner_colon() {
        let item = FavoriteItem::Ayah(AyahFavorite {
            surah: 2,
            ayah: 255,
            surah_name: "Al-Baqarah".to_string(),
            text: "ٱللَّهُ لَآ إِلَـٰهَ إِلَّا هُوَ".to_string(),
            translation: None,
        });

        let key = item.key();
        assert_eq!(key.to_string(), "ayah:2:255");
        assert_eq!("ayah:2:255".parse::<FavoriteKey>().unwrap(), key);
    }

    #[test]
    fn test_favorite_key_rejects_unknown_type() {
        assert!("quiz:1".parse::<FavoriteKey>().is_err());
        assert!("hadith:".parse::<FavoriteKey>().is_err());
        assert!("hadith".parse::<FavoriteKey>().is_err());
    }

    #[test]
    fn test_favorite_item_serializes_with_type_tag() {
        let item = FavoriteItem::Hadith(HadithFavorite {
            id: "42".to_string(),
            collection: "bukhari".to_string(),
            text: "Actions are by intentions".to_string(),
            narrator: Some("Umar ibn al-Khattab".to_string()),
        });

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "hadith");
        assert_eq!(json["id"], "42");

        let back: FavoriteItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), FavoriteKind::Hadith);
    }

    #[test]
    fn test_bookmark_key_bounds() {
        assert_eq!("2:255".parse::<BookmarkKey>().unwrap(), BookmarkKey { surah: 2, ayah: 255 });
        assert!("0:1".parse::<BookmarkKey>().is_err());
        assert!("115:1".parse::<BookmarkKey>().is_err());
        assert!("2:0".parse::<BookmarkKey>().is_err());
        assert!("2-255".parse::<BookmarkKey>().is_err());
    }

    #[test]
    fn test_blank_note_is_dropped() {
        assert_eq!(normalize_note(Some("   ".to_string())), None);
        assert_eq!(
            normalize_note(Some(" memorize ".to_string())),
            Some("memorize".to_string())
        );
    }
}
