#![cfg_attr(not(feature = "std"), no_std)]
//! pont-scratch — **arène scratch** paginée pour le pont natif↔scripting
//!
//! Zone de travail linéaire dans laquelle le pont réserve les tampons
//! temporaires échangés avec le runtime embarqué (arguments, résultats),
//! puis libère tout d'un bloc en revenant à un watermark :
//!
//! - [`ScratchArena`] : pages de taille fixe, allocation **bump** alignée
//! - [`ScratchAddr`] : adresse typée (page, offset), encodable sur 64 bits
//! - [`Checkpoint`] + [`ScratchArena::rollback`] : retour arrière validé,
//!   idempotent, jamais corrupteur (refus propre d'un checkpoint faux)
//! - [`ScratchScope`] : garde RAII, rollback automatique en sortie de portée
//!   (y compris sorties anticipées), désarmable via [`ScratchScope::commit`]
//! - Accès octets borné à la zone *réservée* : un handle périmé par un
//!   rollback échoue avec [`ScratchError::Bounds`] au lieu d'exposer des
//!   octets morts
//!
//! Discipline attendue : pile (dernier réservé, premier libéré). Les couples
//! `mark`/`rollback` la laissent à la charge de l'appelant; la garde
//! [`ScratchScope`] l'impose structurellement.
//!
//! Conçu pour `no_std` (avec `alloc`). Active la feature `std` pour
//! `std::error::Error`; la feature `serde` sérialise les handles.
//!
//! # Exemple éclair
//! ```
//! use pont_scratch::ScratchArena;
//! let mut arena = ScratchArena::new();
//! let cp = arena.mark();
//! let addr = arena.copy_in(b"bonjour").unwrap();
//! assert_eq!(arena.slice(addr, 7).unwrap(), b"bonjour");
//! arena.rollback(cp).unwrap();
//! assert!(arena.slice(addr, 7).is_err()); // handle périmé, refus propre
//! ```

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

use core::fmt;

// ───────────────────────────── Constantes ─────────────────────────────

/// Alignement par défaut des offsets réservés (adapté au marshalling 64 bits).
pub const ALIGN: usize = 8;

/// Taille de page par défaut (64 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

// ───────────────────────────── Erreurs ─────────────────────────────

/// Erreurs de l'arène scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchError {
    /// Plus de place : requête plus grande qu'une page, ou plafond de pages atteint.
    Exhausted {
        /// Octets demandés.
        requested: usize,
    },
    /// Le couple (page, watermark) ne correspond pas à un état antérieur réel.
    BadCheckpoint {
        /// Page visée par le checkpoint.
        page: PageId,
        /// Watermark demandé.
        used: u32,
        /// Watermark actuel de cette page.
        high: u32,
    },
    /// Page inconnue de cette arène.
    UnknownPage(PageId),
    /// Accès hors de la zone réservée (handle périmé ou longueur fausse).
    Bounds,
}

impl fmt::Display for ScratchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { requested } => write!(f, "scratch épuisé ({requested} octets demandés)"),
            Self::BadCheckpoint { page, used, high } => {
                write!(f, "checkpoint invalide: used {used} > {high} sur la page {}", page.0)
            }
            Self::UnknownPage(page) => write!(f, "page inconnue: {}", page.0),
            Self::Bounds => write!(f, "hors zone réservée"),
        }
    }
}

/// Implémente `std::error::Error` uniquement avec la feature `std`.
#[cfg(feature = "std")]
impl std::error::Error for ScratchError {}

/// Alias résultat du crate.
pub type Result<T> = core::result::Result<T, ScratchError>;

// ───────────────────────────── Handles typés ─────────────────────────────

/// Identifiant de page : zone indépendante de l'arène, suivie par son watermark.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PageId(pub u32);

impl PageId {
    /// Première page (l'arène en possède toujours au moins une).
    pub const FIRST: Self = PageId(0);
    /// Index interne.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// Adresse typée d'une réservation : (page, offset en octets).
///
/// Le couplage page/offset reste visible dans le type au lieu de se perdre
/// dans un entier opaque. Encodable sur 64 bits : high = page, low = offset.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ScratchAddr {
    page: PageId,
    offset: u32,
}

impl ScratchAddr {
    /// Construit une adresse.
    pub const fn new(page: PageId, offset: u32) -> Self {
        Self { page, offset }
    }
    /// Page visée.
    pub const fn page(self) -> PageId {
        self.page
    }
    /// Offset dans la page.
    pub const fn offset(self) -> u32 {
        self.offset
    }
    /// Encodage 64 bits (high = page, low = offset).
    pub const fn as_u64(self) -> u64 {
        ((self.page.0 as u64) << 32) | self.offset as u64
    }
    /// Décodage depuis l'encodage 64 bits.
    pub const fn from_u64(raw: u64) -> Self {
        Self { page: PageId((raw >> 32) as u32), offset: (raw & 0xFFFF_FFFF) as u32 }
    }
}

impl fmt::Debug for ScratchAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s#{}+{}", self.page.0, self.offset)
    }
}

/// Point de reprise : (page courante, watermark) au moment du [`ScratchArena::mark`].
///
/// À repasser tel quel à [`ScratchArena::rollback`]; tout ce qui a été
/// réservé depuis est alors libéré d'un bloc.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    page: PageId,
    used: u32,
}

impl Checkpoint {
    /// Page courante au moment de la capture.
    pub const fn page(self) -> PageId {
        self.page
    }
    /// Watermark capturé.
    pub const fn used(self) -> u32 {
        self.used
    }
}

// ───────────────────────────── Arène ─────────────────────────────

#[derive(Clone, Debug)]
struct Page {
    buf: Vec<u8>,
    used: u32,
}

impl Page {
    fn new(size: usize) -> Self {
        let mut buf = Vec::with_capacity(size);
        buf.resize(size, 0);
        Self { buf, used: 0 }
    }
}

/// Arène scratch paginée : allocation bump, libération par rollback.
///
/// Toutes les mutations passent par `&mut self` : pas d'état global, pas de
/// verrou. Une arène par pont; les embarquements multi-threads instancient
/// plusieurs arènes.
#[derive(Clone, Debug)]
pub struct ScratchArena {
    pages: Vec<Page>,
    page_size: u32,
    max_pages: Option<u32>,
    current: u32,
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchArena {
    /// Arène avec la taille de page par défaut, croissance non bornée.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PAGE_SIZE, None)
    }

    /// Taille de page sur mesure, croissance non bornée.
    pub fn with_page_size(page_size: usize) -> Self {
        Self::with_limits(page_size, None)
    }

    /// Taille de page + plafond du nombre de pages (None = illimité).
    pub fn with_limits(page_size: usize, max_pages: Option<u32>) -> Self {
        assert!(page_size > 0 && page_size <= u32::MAX as usize, "taille de page hors bornes");
        let mut arena =
            Self { pages: Vec::new(), page_size: page_size as u32, max_pages, current: 0 };
        arena.pages.push(Page::new(page_size));
        arena
    }

    /// Réserve `size` octets alignés sur [`ALIGN`] et rend leur adresse.
    ///
    /// `size == 0` est un no-op inoffensif : l'adresse du curseur courant est
    /// rendue, le watermark n'avance pas. Si la page courante manque de
    /// place, une page vierge est ouverte (dans la limite de `max_pages`);
    /// une requête plus grande qu'une page échoue avec
    /// [`ScratchError::Exhausted`], jamais par débordement silencieux.
    pub fn reserve(&mut self, size: usize) -> Result<ScratchAddr> {
        self.reserve_aligned(size, ALIGN)
    }

    /// Variante de [`reserve`](Self::reserve) avec alignement explicite (puissance de 2).
    pub fn reserve_aligned(&mut self, size: usize, align: usize) -> Result<ScratchAddr> {
        debug_assert!(align.is_power_of_two());
        if size == 0 {
            let page = &self.pages[self.current as usize];
            return Ok(ScratchAddr::new(PageId(self.current), page.used));
        }
        let page_size = self.page_size as usize;
        if size > page_size {
            return Err(ScratchError::Exhausted { requested: size });
        }
        let used = self.pages[self.current as usize].used as usize;
        let base = align_up(used, align);
        let end = base.checked_add(size).ok_or(ScratchError::Exhausted { requested: size })?;
        if end <= page_size {
            self.pages[self.current as usize].used = end as u32;
            return Ok(ScratchAddr::new(PageId(self.current), base as u32));
        }
        // page courante pleine : on passe sur une page vierge
        self.advance(size)?;
        let page = &mut self.pages[self.current as usize];
        debug_assert_eq!(page.used, 0);
        page.used = size as u32;
        Ok(ScratchAddr::new(PageId(self.current), 0))
    }

    /// Copie `data` dans l'arène (réserve puis écrit) et rend l'adresse.
    pub fn copy_in(&mut self, data: &[u8]) -> Result<ScratchAddr> {
        let addr = self.reserve(data.len())?;
        self.write_bytes(addr, data)?;
        Ok(addr)
    }

    /// Capture le watermark courant, à repasser à [`rollback`](Self::rollback).
    pub fn mark(&self) -> Checkpoint {
        Checkpoint { page: PageId(self.current), used: self.pages[self.current as usize].used }
    }

    /// Restaure l'arène à `cp` : tout ce qui a été réservé depuis est libéré.
    ///
    /// Validé : page inconnue → [`ScratchError::UnknownPage`]; watermark
    /// au-dessus de l'état actuel (checkpoint jamais observé) →
    /// [`ScratchError::BadCheckpoint`], sans toucher l'état. Répéter le même
    /// rollback est un no-op. Les pages ouvertes après `cp` sont vidées mais
    /// leur capacité est conservée pour réutilisation.
    pub fn rollback(&mut self, cp: Checkpoint) -> Result<()> {
        let idx = cp.page.index();
        let high = match self.pages.get(idx) {
            Some(page) => page.used,
            None => return Err(ScratchError::UnknownPage(cp.page)),
        };
        if idx > self.current as usize || cp.used > high {
            return Err(ScratchError::BadCheckpoint { page: cp.page, used: cp.used, high });
        }
        self.pages[idx].used = cp.used;
        for page in &mut self.pages[idx + 1..] {
            page.used = 0;
        }
        self.current = cp.page.0;
        Ok(())
    }

    /// Chemin rapide sans validation.
    ///
    /// Mêmes effets qu'un [`rollback`](Self::rollback) valide. Le checkpoint
    /// doit provenir d'un [`mark`](Self::mark) sur cette arène et décrire un
    /// état antérieur; les invariants ne sont vérifiés qu'en debug.
    pub fn rollback_unchecked(&mut self, cp: Checkpoint) {
        let idx = cp.page.index();
        debug_assert!(idx <= self.current as usize);
        debug_assert!(cp.used <= self.pages[idx].used);
        self.pages[idx].used = cp.used;
        for page in &mut self.pages[idx + 1..] {
            page.used = 0;
        }
        self.current = cp.page.0;
    }

    /// Garde RAII : capture un checkpoint, rollback automatique au drop.
    pub fn scope(&mut self) -> ScratchScope<'_> {
        let cp = self.mark();
        ScratchScope { arena: self, cp, armed: true }
    }

    /// Remet toute l'arène à vide (watermark 0 partout), capacité conservée.
    pub fn reset_all(&mut self) {
        for page in &mut self.pages {
            page.used = 0;
        }
        self.current = 0;
    }

    // ── Accès octets (borné à la zone réservée) ──

    /// Écrit `src` à `addr`. L'intervalle doit être entièrement réservé.
    pub fn write_bytes(&mut self, addr: ScratchAddr, src: &[u8]) -> Result<()> {
        let range = self.check_range(addr, src.len())?;
        self.pages[addr.page.index()].buf[range].copy_from_slice(src);
        Ok(())
    }

    /// Lit `dst.len()` octets depuis `addr`.
    pub fn read_bytes(&self, addr: ScratchAddr, dst: &mut [u8]) -> Result<()> {
        let range = self.check_range(addr, dst.len())?;
        dst.copy_from_slice(&self.pages[addr.page.index()].buf[range]);
        Ok(())
    }

    /// Vue en lecture sur `len` octets réservés à `addr`.
    pub fn slice(&self, addr: ScratchAddr, len: usize) -> Result<&[u8]> {
        let range = self.check_range(addr, len)?;
        Ok(&self.pages[addr.page.index()].buf[range])
    }

    /// Vue mutable sur `len` octets réservés à `addr`.
    pub fn slice_mut(&mut self, addr: ScratchAddr, len: usize) -> Result<&mut [u8]> {
        let range = self.check_range(addr, len)?;
        Ok(&mut self.pages[addr.page.index()].buf[range])
    }

    fn check_range(&self, addr: ScratchAddr, len: usize) -> Result<core::ops::Range<usize>> {
        let page = self.pages.get(addr.page.index()).ok_or(ScratchError::UnknownPage(addr.page))?;
        let start = addr.offset as usize;
        let end = start.checked_add(len).ok_or(ScratchError::Bounds)?;
        // borné au watermark, pas à la capacité : un handle invalidé par un
        // rollback tombe ici
        if end > page.used as usize {
            return Err(ScratchError::Bounds);
        }
        Ok(start..end)
    }

    // ── Introspection ──

    /// Taille d'une page en octets.
    pub fn page_size(&self) -> usize {
        self.page_size as usize
    }
    /// Nombre de pages matérialisées.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
    /// Page courante (celle qui sert les prochaines réservations).
    pub fn current_page(&self) -> PageId {
        PageId(self.current)
    }
    /// Watermark d'une page, si elle existe.
    pub fn used(&self, page: PageId) -> Option<u32> {
        self.pages.get(page.index()).map(|p| p.used)
    }
    /// Octets réservés, toutes pages confondues.
    pub fn total_used(&self) -> usize {
        self.pages.iter().map(|p| p.used as usize).sum()
    }
    /// Capacité totale matérialisée.
    pub fn total_capacity(&self) -> usize {
        self.pages.len() * self.page_size as usize
    }
    /// Itère `(page, watermark)` dans l'ordre des pages.
    pub fn usage(&self) -> impl Iterator<Item = (PageId, u32)> + '_ {
        self.pages.iter().enumerate().map(|(i, p)| (PageId(i as u32), p.used))
    }

    fn advance(&mut self, requested: usize) -> Result<()> {
        let next = self.current as usize + 1;
        if next == self.pages.len() {
            if let Some(cap) = self.max_pages {
                if self.pages.len() as u32 >= cap {
                    return Err(ScratchError::Exhausted { requested });
                }
            }
            self.pages.push(Page::new(self.page_size as usize));
        }
        // invariant : les pages au-delà de la courante sont toujours vierges
        debug_assert_eq!(self.pages[next].used, 0);
        self.current = next as u32;
        Ok(())
    }
}

const fn align_up(v: usize, align: usize) -> usize {
    (v + (align - 1)) & !(align - 1)
}

// ───────────────────────────── Garde RAII ─────────────────────────────

/// Portée scratch : tout ce qui est réservé à travers elle (ou directement
/// sur l'arène pendant sa vie) est libéré au drop, y compris en sortie
/// anticipée. [`commit`](Self::commit) désarme la garde et conserve les
/// réservations.
pub struct ScratchScope<'a> {
    arena: &'a mut ScratchArena,
    cp: Checkpoint,
    armed: bool,
}

impl ScratchScope<'_> {
    /// Réserve via l'arène sous-jacente.
    pub fn reserve(&mut self, size: usize) -> Result<ScratchAddr> {
        self.arena.reserve(size)
    }
    /// Réserve avec alignement explicite.
    pub fn reserve_aligned(&mut self, size: usize, align: usize) -> Result<ScratchAddr> {
        self.arena.reserve_aligned(size, align)
    }
    /// Copie `data` dans l'arène.
    pub fn copy_in(&mut self, data: &[u8]) -> Result<ScratchAddr> {
        self.arena.copy_in(data)
    }
    /// Vue en lecture sur une réservation faite dans cette portée.
    pub fn slice(&self, addr: ScratchAddr, len: usize) -> Result<&[u8]> {
        self.arena.slice(addr, len)
    }
    /// Checkpoint capturé à l'entrée de la portée.
    pub fn checkpoint(&self) -> Checkpoint {
        self.cp
    }
    /// Désarme la garde : les réservations de la portée restent vivantes.
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for ScratchScope<'_> {
    fn drop(&mut self) {
        // le checkpoint vient de mark() sur cette arène : toujours valide
        if self.armed {
            self.arena.rollback_unchecked(self.cp);
        }
    }
}

// ───────────────────────────── Tests ─────────────────────────────
