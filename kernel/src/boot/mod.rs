//! Boot protocol support.
//!
//! The assembly below is the first code in the image: the Multiboot2
//! header the loader scans for, and the protected-mode entry that climbs
//! into long mode before handing over to `kernel_main`. The
//! [`multiboot2`] module parses the information block the loader leaves
//! behind.

pub mod multiboot2;

// A Multiboot2 loader enters `_start` in 32-bit protected mode with
// paging off, EAX holding the magic and EBX the physical address of the
// boot information block. The stub identity-maps the first GiB with 2 MiB
// pages so everything the early kernel touches (image, frame bitmap, heap
// window, fresh page tables) stays addressable until `kernel_main`
// installs its own hierarchy, then enables long mode and far-jumps into
// the 64-bit segment.
core::arch::global_asm!(
    r#"
# Multiboot2 header: magic, architecture (0 = i386 protected mode),
# length, checksum, then the terminating end tag. The linker script keeps
# this section at the front of the image, inside the loader's 32 KiB
# search window.
.section .multiboot_header, "a"
.align 8
multiboot_header:
    .long 0xe85250d6
    .long 0
    .long multiboot_header_end - multiboot_header
    .long -(0xe85250d6 + 0 + (multiboot_header_end - multiboot_header))
    .word 0
    .word 0
    .long 8
multiboot_header_end:

.section .text
.code32
.global _start
_start:
    cli
    cld
    mov esp, offset boot_stack_top

    # kernel_main(magic, boot_info) per the System V ABI.
    mov edi, eax
    mov esi, ebx

    # One PML4 entry -> one PDPT entry -> 512 huge pages: identity map of
    # the first GiB. The tables live in .bss, zero-filled by the loader.
    lea eax, [boot_pdpt]
    or eax, 0x3
    mov dword ptr [boot_pml4], eax
    lea eax, [boot_pd]
    or eax, 0x3
    mov dword ptr [boot_pdpt], eax

    xor ecx, ecx
1:
    mov eax, ecx
    shl eax, 21
    or eax, 0x83
    mov dword ptr [boot_pd + ecx * 8], eax
    inc ecx
    cmp ecx, 512
    jne 1b

    # Physical address extension, then the new root.
    mov eax, cr4
    or eax, 1 << 5
    mov cr4, eax

    lea eax, [boot_pml4]
    mov cr3, eax

    # Long mode enable in EFER.
    mov ecx, 0xc0000080
    rdmsr
    or eax, 1 << 8
    wrmsr

    # Paging on; the CPU is now in compatibility mode.
    mov eax, cr0
    or eax, 1 << 31
    mov cr0, eax

    # Far transfer into the 64-bit code segment.
    lgdt [boot_gdt_pointer]
    push 0x08
    lea eax, [long_mode_entry]
    push eax
    retf

.code64
long_mode_entry:
    xor ax, ax
    mov ss, ax
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    # The upper halves of the argument registers are undefined after the
    # mode switch; 32-bit moves zero-extend.
    mov edi, edi
    mov esi, esi
    xor ebp, ebp
    call kernel_main
2:
    hlt
    jmp 2b

# Flat descriptors for the mode switch only; bring-up loads the kernel's
# own table.
.section .rodata
.align 16
boot_gdt:
    .quad 0
    .quad 0x00af9a000000ffff
    .quad 0x00cf92000000ffff
boot_gdt_pointer:
    .word boot_gdt_pointer - boot_gdt - 1
    .long boot_gdt

.section .bss
.align 4096
boot_pml4:
    .skip 4096
boot_pdpt:
    .skip 4096
boot_pd:
    .skip 4096
boot_stack_bottom:
    .skip 16384
boot_stack_top:

.section .text
.code64
"#
);
